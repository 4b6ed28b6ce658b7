//! Plaintext content hashing, shared by `crypto-core` (content hash for
//! newly encrypted notes) and `reconciliation-engine` (local file scanning).
//!
//! SHA-256 is computed directly with a small helper here (rather than
//! duplicated at each call site) because the exact hex encoding must match
//! byte-for-byte between what a file scan computes locally and what the
//! server returns in a [`crate::model::ManifestEntry`].

use sha2::{Digest, Sha256};

/// Hex-encoded lowercase SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
