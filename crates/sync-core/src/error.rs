//! Error taxonomy (§7). Every variant maps to one of the kinds named in the
//! design doc; `kind()` returns a stable low-cardinality label for the
//! per-kind counters in `telemetry`.

use thiserror::Error;

/// Top-level error type returned by sync engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("encryption is locked")]
    NotUnlocked,
    #[error("wrong password")]
    WrongPassword,
    #[error("ciphertext failed authentication")]
    InvalidCiphertext,

    #[error("version conflict on note {note_id}: expected {expected}, server has {actual}")]
    VersionConflict { note_id: String, expected: u64, actual: u64 },

    #[error("transient sync failure: {0}")]
    SyncTransient(String),

    #[error("upload permanently failed for {path}: {last_error}")]
    PermanentUpload { path: String, last_error: String },

    #[error("local state corrupted: {0}")]
    Corruption(String),

    #[error("conflict on {path} requires a user decision")]
    UserDecisionRequired { path: String },

    #[error("local index error: {0}")]
    LocalIndex(String),

    #[error("remote api error: {0}")]
    Remote(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Stable, low-cardinality label for metrics and structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotAuthenticated => "not_authenticated",
            SyncError::TokenRefreshFailed(_) => "token_refresh_failed",
            SyncError::NotUnlocked => "not_unlocked",
            SyncError::WrongPassword => "wrong_password",
            SyncError::InvalidCiphertext => "invalid_ciphertext",
            SyncError::VersionConflict { .. } => "version_conflict",
            SyncError::SyncTransient(_) => "sync_transient",
            SyncError::PermanentUpload { .. } => "permanent_upload",
            SyncError::Corruption(_) => "corruption",
            SyncError::UserDecisionRequired { .. } => "user_decision_required",
            SyncError::LocalIndex(_) => "local_index",
            SyncError::Remote(_) => "remote",
            SyncError::Io(_) => "io",
        }
    }

    /// Whether this kind is ever expected to reach a direct caller of
    /// `modify()`/`reconcile()`, as opposed to being handled inline
    /// (version conflicts are never surfaced — see §7 propagation policy).
    #[must_use]
    pub fn is_terminal_for_operation(&self) -> bool {
        !matches!(self, SyncError::VersionConflict { .. } | SyncError::SyncTransient(_))
    }
}

/// Convenience alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_is_never_terminal() {
        let e = SyncError::VersionConflict { note_id: "n1".into(), expected: 1, actual: 2 };
        assert!(!e.is_terminal_for_operation());
        assert_eq!(e.kind(), "version_conflict");
    }

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(SyncError::NotUnlocked.kind(), "not_unlocked");
        assert_eq!(SyncError::WrongPassword.kind(), "wrong_password");
    }
}
