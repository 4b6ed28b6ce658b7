//! Key derivation, key wrapping, and per-note authenticated encryption for
//! the sync engine (§4.1).
//!
//! The account's master key is generated once, wrapped under a
//! PBKDF2-derived key, and held in memory only while the session is
//! unlocked. Titles and note bodies are encrypted independently under the
//! master key with AES-256-GCM and a fresh random nonce per call.

#![deny(unsafe_code)]

mod blob;
mod error;
mod key;

use std::sync::Mutex;

use sync_core::{hashing, EncryptionAlgo};

pub use error::Error;
pub use key::{WrappedKeyMaterial, PBKDF2_ITERATIONS};

/// The result of encrypting a note's title and body under the current master key.
#[derive(Debug, Clone)]
pub struct EncryptedNote {
    pub encrypted_title: String,
    pub encrypted_content: String,
    pub encryption_algo: EncryptionAlgo,
    /// SHA-256 hex of the plaintext body, used for manifest diffing.
    pub content_hash: String,
}

/// Holds the account's master key while unlocked and performs all
/// encryption/decryption for the rest of the engine. Safe to share behind
/// an `Arc`: internal state is guarded by a plain mutex since no operation
/// here ever awaits while holding the lock.
#[derive(Default)]
pub struct CryptoCore {
    master_key: Mutex<Option<key::MasterKey>>,
}

impl CryptoCore {
    pub fn new() -> Self {
        Self { master_key: Mutex::new(None) }
    }

    /// True once a master key is held in memory.
    pub fn is_unlocked(&self) -> bool {
        self.master_key.lock().expect("lock poisoned").is_some()
    }

    /// Generates a fresh master key, wraps it under `password`, and unlocks
    /// with it immediately. Returns the material to persist locally and
    /// mirror to the server.
    pub fn setup(&self, password: &str) -> WrappedKeyMaterial {
        let (master, material) = key::setup(password);
        *self.master_key.lock().expect("lock poisoned") = Some(master);
        material
    }

    /// Re-derives the wrapping key from `password` and unwraps the master
    /// key from previously persisted `material`.
    pub fn unlock(&self, password: &str, material: &WrappedKeyMaterial) -> Result<(), Error> {
        let master = key::unlock(password, material)?;
        *self.master_key.lock().expect("lock poisoned") = Some(master);
        Ok(())
    }

    /// Alias for [`Self::unlock`] used by the login flow, where the wrapped
    /// key material has just been fetched from the server rather than read
    /// from local storage.
    pub fn restore_from_password(
        &self,
        password: &str,
        material: &WrappedKeyMaterial,
    ) -> Result<(), Error> {
        self.unlock(password, material)
    }

    /// Drops the in-memory master key. Subsequent encrypt/decrypt calls
    /// fail with [`Error::NotUnlocked`] until the next `unlock`.
    pub fn lock(&self) {
        *self.master_key.lock().expect("lock poisoned") = None;
    }

    fn with_key<T>(&self, f: impl FnOnce(&[u8]) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self.master_key.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(master) => f(&master.0),
            None => Err(Error::NotUnlocked),
        }
    }

    /// Encrypts an arbitrary byte string under the master key.
    pub fn encrypt_blob(&self, plaintext: &[u8]) -> Result<String, Error> {
        self.with_key(|key| blob::encode_blob(key, plaintext))
    }

    /// Decrypts a blob produced by [`Self::encrypt_blob`].
    pub fn decrypt_blob(&self, ciphertext: &str) -> Result<Vec<u8>, Error> {
        self.with_key(|key| blob::decode_blob(key, ciphertext))
    }

    /// Encrypts a note's title and body independently. Always writes the
    /// current embedded-nonce wire format; legacy records are only ever
    /// decrypted, never produced.
    pub fn encrypt_note(&self, title: &str, content: &str) -> Result<EncryptedNote, Error> {
        self.with_key(|key| {
            let encrypted_title = blob::encode_blob(key, title.as_bytes())?;
            let encrypted_content = blob::encode_blob(key, content.as_bytes())?;
            Ok(EncryptedNote {
                encrypted_title,
                encrypted_content,
                encryption_algo: EncryptionAlgo::Aes256GcmEmbedded,
                content_hash: hashing::sha256_hex(content.as_bytes()),
            })
        })
    }

    /// Decrypts a note's title and body, dispatching on `encryption_algo`
    /// to the embedded-nonce or legacy-explicit-nonce wire format (§9).
    pub fn decrypt_note(&self, note: &sync_core::Note) -> Result<(String, String), Error> {
        self.with_key(|key| match note.encryption_algo {
            EncryptionAlgo::Aes256GcmEmbedded => {
                let title = blob::decode_blob(key, &note.encrypted_title)?;
                let content = blob::decode_blob(key, &note.encrypted_content)?;
                Ok((bytes_to_string(title)?, bytes_to_string(content)?))
            }
            EncryptionAlgo::Aes256GcmLegacy => {
                let nonce = note
                    .nonce
                    .as_deref()
                    .ok_or_else(|| Error::Encoding("legacy record missing nonce".into()))?;
                let title = blob::decode_with_explicit_nonce(key, nonce, &note.encrypted_title)?;
                let content =
                    blob::decode_with_explicit_nonce(key, nonce, &note.encrypted_content)?;
                Ok((bytes_to_string(title)?, bytes_to_string(content)?))
            }
        })
    }
}

fn bytes_to_string(bytes: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(bytes).map_err(|e| Error::Encoding(e.to_string()))
}
