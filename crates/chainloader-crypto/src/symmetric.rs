//! Symmetric sealing for on-chain payloads and keeper content.
//!
//! Blob layout: `nonce(12) || ciphertext || tag(16)`. Nonces are random,
//! since a key may seal many unrelated blobs.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::ecdh::KEY_LEN;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Error type for symmetric operations.
#[derive(Debug, thiserror::Error)]
pub enum SymmetricError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid blob: too short")]
    InvalidBlob,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("RNG failed")]
    RngError,
}

fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305, SymmetricError> {
    if key.len() != KEY_LEN {
        return Err(SymmetricError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        });
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
}

/// Encrypt `plaintext` under a 32-byte key.
///
/// Returns: nonce(12) || ciphertext+tag
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SymmetricError> {
    let aead = cipher(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|_| SymmetricError::RngError)?;

    let ct = aead
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SymmetricError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a blob produced by [`seal`].
///
/// Expects: nonce(12) || ciphertext+tag
pub fn open(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, SymmetricError> {
    let aead = cipher(key)?;
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(SymmetricError::InvalidBlob);
    }
    let (nonce, ct) = blob.split_at(NONCE_LEN);
    aead.decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| SymmetricError::DecryptionFailed)
}

/// Size of a sealed blob for a plaintext of `len` bytes.
pub const fn sealed_len(len: usize) -> usize {
    NONCE_LEN + len + TAG_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_key_fails() {
        let blob = seal(&[1u8; 32], b"Secret message").unwrap();
        let result = open(&[2u8; 32], &blob);
        assert!(matches!(result, Err(SymmetricError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [7u8; 32];
        let mut blob = seal(&key, b"Secret message").unwrap();
        blob[NONCE_LEN] ^= 0xFF;
        assert!(open(&key, &blob).is_err());
    }

    #[test]
    fn test_short_blob_rejected() {
        let result = open(&[7u8; 32], &[0u8; 20]);
        assert!(matches!(result, Err(SymmetricError::InvalidBlob)));
    }

    #[test]
    fn test_bad_key_length_rejected() {
        let result = seal(&[7u8; 16], b"x");
        assert!(matches!(
            result,
            Err(SymmetricError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_sealed_len() {
        let blob = seal(&[7u8; 32], &[0u8; 32]).unwrap();
        assert_eq!(blob.len(), sealed_len(32));
        assert_eq!(sealed_len(32), 60);
    }

    #[test]
    fn test_nonces_differ() {
        let key = [9u8; 32];
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }
}
