//! Three-way textual merge used when the same note changed on two devices
//! between syncs (§4.7).
//!
//! Each side is diffed independently against the last-synced ancestor body,
//! producing two sets of line hunks. If the hunks touch disjoint ranges of
//! the ancestor, both sides changed different parts of the note and the
//! merge applies cleanly. If any hunk from one side overlaps a hunk from
//! the other, the two devices edited the same lines and a person has to
//! pick a winner.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, OnceLock};

use similar::{ChangeTag, DiffOp, TextDiff};

/// Outcome of attempting to merge a note's local and remote bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Every hunk applied cleanly; carries the merged body.
    AutoMerged(String),
    /// At least one hunk could have discarded remote content; carries the
    /// local body unchanged so the caller can surface it for a user decision.
    NeedsUserDecision(String),
}

/// In-process counters for conflict outcomes, keyed by outcome label.
/// Low-cardinality, not persisted across restarts.
#[derive(Default)]
pub struct ConflictMetrics {
    inner: Arc<Mutex<HashMap<&'static str, u64>>>,
}

impl ConflictMetrics {
    pub fn count(&self, outcome: &'static str) -> u64 {
        self.inner.lock().expect("metrics lock poisoned").get(outcome).copied().unwrap_or(0)
    }

    fn inc(&self, outcome: &'static str) {
        *self.inner.lock().expect("metrics lock poisoned").entry(outcome).or_insert(0) += 1;
    }
}

static METRICS: OnceLock<ConflictMetrics> = OnceLock::new();

pub fn conflict_metrics() -> &'static ConflictMetrics {
    METRICS.get_or_init(ConflictMetrics::default)
}

/// One resolved-or-deferred conflict, retained for the audit trail.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub path: String,
    pub outcome_label: &'static str,
}

/// Drainable log of every conflict this process has resolved or deferred.
#[derive(Clone, Default)]
pub struct AuditSink {
    inner: Arc<Mutex<Vec<ConflictRecord>>>,
}

impl AuditSink {
    pub fn drain(&self) -> Vec<ConflictRecord> {
        std::mem::take(&mut *self.inner.lock().expect("audit lock poisoned"))
    }

    fn record(&self, record: ConflictRecord) {
        self.inner.lock().expect("audit lock poisoned").push(record);
    }
}

static AUDIT: OnceLock<AuditSink> = OnceLock::new();

pub fn install_audit_sink() -> AuditSink {
    AUDIT.get_or_init(AuditSink::default).clone()
}

/// A contiguous run of ancestor lines replaced by `text` on one side.
struct Hunk {
    old_range: Range<usize>,
    text: String,
}

/// Diffs `other` against `ancestor` and returns every non-equal hunk,
/// expressed as a range of ancestor line indices plus the replacement text.
fn hunks_against(ancestor: &str, other: &str) -> Vec<Hunk> {
    let diff = TextDiff::from_lines(ancestor, other);
    diff.ops()
        .iter()
        .filter(|op| !matches!(op, DiffOp::Equal { .. }))
        .map(|op| {
            let text = diff
                .iter_changes(op)
                .filter(|change| change.tag() == ChangeTag::Insert)
                .map(|change| change.value().to_string())
                .collect();
            Hunk { old_range: op.old_range(), text }
        })
        .collect()
}

fn ranges_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Three-way-merges `local` and `remote`, both diffed against `ancestor`.
/// Returns `None` if the two sides touched overlapping ancestor lines.
fn merge(ancestor: &str, local: &str, remote: &str) -> Option<String> {
    let local_hunks = hunks_against(ancestor, local);
    let remote_hunks = hunks_against(ancestor, remote);

    for l in &local_hunks {
        if remote_hunks.iter().any(|r| ranges_overlap(&l.old_range, &r.old_range)) {
            return None;
        }
    }

    let ancestor_lines: Vec<&str> = ancestor.split_inclusive('\n').collect();
    let mut hunks: Vec<&Hunk> = local_hunks.iter().chain(remote_hunks.iter()).collect();
    hunks.sort_by_key(|h| h.old_range.start);

    let mut merged = String::new();
    let mut cursor = 0;
    for hunk in hunks {
        if hunk.old_range.start > cursor {
            merged.push_str(&ancestor_lines[cursor..hunk.old_range.start].concat());
        }
        merged.push_str(&hunk.text);
        cursor = cursor.max(hunk.old_range.end);
    }
    if cursor < ancestor_lines.len() {
        merged.push_str(&ancestor_lines[cursor..].concat());
    }
    Some(merged)
}

/// Attempts to merge `local` and `remote` bodies for `path`, both diffed
/// against the last-synced `ancestor` body.
pub fn resolve(path: &str, ancestor: &str, local: &str, remote: &str) -> ConflictOutcome {
    let (outcome, label) = match merge(ancestor, local, remote) {
        Some(merged) => (ConflictOutcome::AutoMerged(merged), "auto_merged"),
        None => (ConflictOutcome::NeedsUserDecision(local.to_string()), "needs_user_decision"),
    };

    conflict_metrics().inc(label);
    if let Some(sink) = AUDIT.get() {
        sink.record(ConflictRecord { path: path.to_string(), outcome_label: label });
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_local_addition_auto_merges() {
        let ancestor = "line one\nline two\n";
        let remote = ancestor;
        let local = "line one\nline two\nline three\n";
        let outcome = resolve("notes/a.md", ancestor, local, remote);
        assert_eq!(outcome, ConflictOutcome::AutoMerged(local.to_string()));
    }

    #[test]
    fn identical_bodies_auto_merge_as_no_op() {
        let text = "unchanged\n";
        let outcome = resolve("notes/a.md", text, text, text);
        assert_eq!(outcome, ConflictOutcome::AutoMerged(text.to_string()));
    }

    #[test]
    fn local_edit_of_a_line_remote_left_untouched_auto_merges() {
        let ancestor = "line one\nline two\n";
        let remote = "line one\nline two\n";
        let local = "line one\nLINE TWO EDITED\n";
        let outcome = resolve("notes/a.md", ancestor, local, remote);
        assert_eq!(outcome, ConflictOutcome::AutoMerged(local.to_string()));
    }

    #[test]
    fn both_sides_editing_the_same_line_needs_a_decision() {
        let ancestor = "line one\nline two\n";
        let local = "line one\nLINE TWO LOCAL\n";
        let remote = "line one\nLINE TWO REMOTE\n";
        let outcome = resolve("notes/a.md", ancestor, local, remote);
        assert_eq!(outcome, ConflictOutcome::NeedsUserDecision(local.to_string()));
    }

    #[test]
    fn local_deletion_of_a_line_remote_left_untouched_auto_merges() {
        let ancestor = "line one\nline two\n";
        let remote = "line one\nline two\n";
        let local = "line one\n";
        let outcome = resolve("notes/a.md", ancestor, local, remote);
        assert_eq!(outcome, ConflictOutcome::AutoMerged(local.to_string()));
    }

    #[test]
    fn non_overlapping_top_and_bottom_inserts_auto_merge() {
        // One device prepends a line, the other appends one: disjoint edits
        // against the shared ancestor, so both land in the merged body.
        let ancestor = "middle\n";
        let local = "top\nmiddle\n";
        let remote = "middle\nbottom\n";
        let outcome = resolve("notes/a.md", ancestor, local, remote);
        assert_eq!(outcome, ConflictOutcome::AutoMerged("top\nmiddle\nbottom\n".to_string()));
    }

    #[test]
    fn metrics_count_outcomes_by_label() {
        install_audit_sink();
        let before = conflict_metrics().count("auto_merged");
        resolve("notes/x.md", "a\nb\n", "a\nb\nc\n", "a\nb\n");
        assert_eq!(conflict_metrics().count("auto_merged"), before + 1);
    }
}
