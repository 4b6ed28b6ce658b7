//! Three-way write-plan decision for a downloaded note that already has a
//! local mapping (§4.8.1).

/// What to do with an incoming remote update for a path the engine already
/// tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    /// `L == R`: nothing to write, just bump the version row.
    NoOp,
    /// `L != R`, `L == S`, `R != S`: server moved on, we didn't; pull it.
    AcceptServer,
    /// `L != R`, `L != S`, `R == S`: we moved on, server didn't; let the
    /// next upload carry it.
    SkipLocalAhead,
    /// `L != R`, `L != S`, `R != S`: both sides moved independently.
    Conflict,
    /// No `content_hash_last_synced` on record: first time this path syncs.
    FirstSync,
}

/// Decides the write plan from local (`local_hash`), remote (`remote_hash`)
/// and last-synced (`last_synced`) content hashes.
pub fn decide(local_hash: &str, remote_hash: &str, last_synced: Option<&str>) -> WritePlan {
    let Some(last_synced) = last_synced else {
        return WritePlan::FirstSync;
    };

    if local_hash == remote_hash {
        return WritePlan::NoOp;
    }

    match (local_hash == last_synced, remote_hash == last_synced) {
        (true, false) => WritePlan::AcceptServer,
        (false, true) => WritePlan::SkipLocalAhead,
        _ => WritePlan::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_hashes_are_a_no_op() {
        assert_eq!(decide("h", "h", Some("s")), WritePlan::NoOp);
    }

    #[test]
    fn pure_pull_when_local_matches_last_synced() {
        assert_eq!(decide("s", "r", Some("s")), WritePlan::AcceptServer);
    }

    #[test]
    fn local_ahead_when_remote_matches_last_synced() {
        assert_eq!(decide("l", "s", Some("s")), WritePlan::SkipLocalAhead);
    }

    #[test]
    fn true_conflict_when_all_three_diverge() {
        assert_eq!(decide("l", "r", Some("s")), WritePlan::Conflict);
    }

    #[test]
    fn missing_last_synced_is_first_sync_regardless_of_hashes() {
        assert_eq!(decide("l", "r", None), WritePlan::FirstSync);
    }
}
