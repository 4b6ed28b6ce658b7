//! Identifier and timestamp helpers shared across the sync engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

static NEXT_LOCAL_SEQ: AtomicU64 = AtomicU64::new(1);

/// A process-local monotonic sequence number, used to order queue items and
/// WAL-style records that do not yet have a server-assigned version.
pub fn next_local_seq() -> u64 {
    NEXT_LOCAL_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since the UNIX epoch using the system wall clock.
///
/// Production code should prefer [`crate::clock::Clock::now_ms`] so tests can
/// substitute a virtual clock; this free function exists for call sites (e.g.
/// generating a fresh device id) that only need a one-off timestamp.
pub fn system_now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis()
        as u64
}

/// Generate a fresh opaque device identifier (UUID v4).
pub fn new_device_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_seq_is_monotonic() {
        let a = next_local_seq();
        let b = next_local_seq();
        assert!(b > a);
    }

    #[test]
    fn device_id_is_uuid_shaped() {
        let id = new_device_id();
        assert_eq!(id.len(), 36);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }
}
