//! Crypto-core's own error type. `reconciliation-engine` and
//! `sync-orchestrator` fold these into `sync_core::SyncError` at the
//! boundary (§7).

use thiserror::Error;

/// Errors raised by key derivation, key wrapping, or blob encryption/decryption.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation requiring the master key was attempted before `setup`/`unlock`.
    #[error("encryption is locked")]
    NotUnlocked,
    /// `unlock`/`restore_from_password` failed GCM authentication on the wrapped key.
    #[error("wrong password")]
    WrongPassword,
    /// A blob failed GCM authentication on decrypt.
    #[error("ciphertext failed authentication")]
    InvalidCiphertext,
    /// Malformed base64/JSON wire encoding (not a cryptographic failure).
    #[error("malformed ciphertext encoding: {0}")]
    Encoding(String),
}
