//! Key derivation and the wrapped-master-key wire format.
//!
//! The master key is a random 256-bit value generated once at `setup` and
//! never changes thereafter, even across password changes: only its
//! wrapping (the PBKDF2-derived key encrypting it) is replaced. This keeps
//! every note encrypted under one key for the lifetime of the account.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::blob::{decode_blob, encode_blob};
use crate::error::Error;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// The account's long-lived symmetric key, held in memory only while unlocked.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(pub(crate) [u8; KEY_LEN]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MasterKey").field(&"<redacted>").finish()
    }
}

impl MasterKey {
    fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// What gets persisted locally and mirrored to the server: enough to
/// re-derive the wrapping key from a password and recover the master key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WrappedKeyMaterial {
    /// Base64 of a random 128-bit salt.
    pub salt: String,
    pub kdf_iterations: u32,
    /// Base64 of `nonce ∥ ciphertext ∥ tag` for the master key under the
    /// PBKDF2-derived wrapping key.
    pub wrapped_key: String,
}

fn derive_wrapping_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    // Infallible: `out` has the fixed length `pbkdf2` expects.
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, iterations, &mut out)
        .expect("pbkdf2 output length matches key length");
    out
}

/// Generates a fresh master key and wraps it under a password-derived key.
/// Returns the material to persist alongside the account.
pub fn setup(password: &str) -> (MasterKey, WrappedKeyMaterial) {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut wrapping_key = derive_wrapping_key(password, &salt, PBKDF2_ITERATIONS);

    let master_key = MasterKey::generate();
    let wrapped_key = encode_blob(&wrapping_key, &master_key.0).expect("in-memory key is small");
    wrapping_key.zeroize();

    let material = WrappedKeyMaterial {
        salt: B64.encode(salt),
        kdf_iterations: PBKDF2_ITERATIONS,
        wrapped_key,
    };
    (master_key, material)
}

/// Re-derives the wrapping key from `password` and `material.salt`, then
/// unwraps the master key. Fails with [`Error::WrongPassword`] if the
/// wrapped key does not authenticate under the derived key.
pub fn unlock(password: &str, material: &WrappedKeyMaterial) -> Result<MasterKey, Error> {
    let salt = B64.decode(&material.salt).map_err(|e| Error::Encoding(e.to_string()))?;
    let mut wrapping_key = derive_wrapping_key(password, &salt, material.kdf_iterations);

    let unwrapped = decode_blob(&wrapping_key, &material.wrapped_key).map_err(|e| match e {
        Error::InvalidCiphertext => Error::WrongPassword,
        other => other,
    });
    wrapping_key.zeroize();
    let mut unwrapped = unwrapped?;

    if unwrapped.len() != KEY_LEN {
        unwrapped.zeroize();
        return Err(Error::Encoding("unwrapped key has unexpected length".into()));
    }
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(&unwrapped);
    unwrapped.zeroize();
    Ok(MasterKey(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_round_trips_with_correct_password() {
        let (master, material) = setup("correct horse battery staple");
        let recovered = unlock("correct horse battery staple", &material).expect("unlocks");
        assert_eq!(master.0, recovered.0);
    }

    #[test]
    fn unlock_rejects_wrong_password() {
        let (_master, material) = setup("right password");
        let err = unlock("wrong password", &material).unwrap_err();
        assert!(matches!(err, Error::WrongPassword));
    }

    #[test]
    fn each_setup_yields_a_distinct_salt() {
        let (_, a) = setup("same password");
        let (_, b) = setup("same password");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.wrapped_key, b.wrapped_key);
    }
}
