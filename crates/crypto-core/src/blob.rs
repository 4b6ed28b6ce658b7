//! The AES-256-GCM wire format shared by key wrapping and note encryption:
//! `base64(nonce(12) ∥ ciphertext ∥ tag)`. Nonces are always generated
//! randomly per call — never derived from a counter or from content, so two
//! encryptions of the same plaintext never produce the same blob.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;

use crate::error::Error;

const NONCE_LEN: usize = 12;

fn cipher(key: &[u8]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

/// Encrypts `plaintext` under `key` with a fresh random nonce, returning the
/// base64 `nonce ∥ ciphertext ∥ tag` blob.
pub fn encode_blob(key: &[u8], plaintext: &[u8]) -> Result<String, Error> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher(key)
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::Encoding("encryption failure".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.append(&mut ciphertext);
    Ok(B64.encode(out))
}

/// Decrypts a blob produced by [`encode_blob`]. Returns
/// [`Error::InvalidCiphertext`] on GCM authentication failure (wrong key or
/// tampered data) and [`Error::Encoding`] on a malformed wire format.
pub fn decode_blob(key: &[u8], blob_b64: &str) -> Result<Vec<u8>, Error> {
    let raw = B64
        .decode(blob_b64)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    if raw.len() < NONCE_LEN {
        return Err(Error::Encoding("blob shorter than nonce".into()));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher(key)
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::InvalidCiphertext)
}

/// Decrypts ciphertext encrypted under a nonce carried out-of-band, for
/// notes written under `sync_core::EncryptionAlgo::Aes256GcmLegacy` before
/// the wire format started embedding the nonce.
pub fn decode_with_explicit_nonce(
    key: &[u8],
    nonce_b64: &str,
    ciphertext_b64: &str,
) -> Result<Vec<u8>, Error> {
    let nonce_bytes = B64
        .decode(nonce_b64)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::Encoding("nonce has unexpected length".into()));
    }
    let ciphertext = B64
        .decode(ciphertext_b64)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher(key)
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| Error::InvalidCiphertext)
}
