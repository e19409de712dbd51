//! Shared-key derivation.
//!
//! Two parties holding x25519 keys derive the same 32-byte symmetric key
//! regardless of which side contributes the private half:
//! `HKDF-SHA256(dh(priv_a, pub_b))`.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of private, public and shared keys in bytes.
pub const KEY_LEN: usize = 32;

const SHARED_KEY_INFO: &[u8] = b"chainloader_shared_key_v1";

/// Error type for key exchange operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyExchangeError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("degenerate shared secret")]
    NonContributory,
}

/// Symmetric key material produced by ECDH. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

fn key_array(b: &[u8]) -> Result<[u8; KEY_LEN], KeyExchangeError> {
    b.try_into().map_err(|_| KeyExchangeError::InvalidKeyLength {
        expected: KEY_LEN,
        got: b.len(),
    })
}

/// Derive the public half for an x25519 private key.
pub fn public_key(private: &[u8]) -> Result<[u8; KEY_LEN], KeyExchangeError> {
    let secret = StaticSecret::from(key_array(private)?);
    Ok(*X25519PublicKey::from(&secret).as_bytes())
}

/// Derive the shared encryption key between `private` and the peer's `public`.
///
/// # Arguments
/// * `private` - 32-byte x25519 private key of the owning side
/// * `public` - 32-byte x25519 public key of the other side
pub fn shared_encryption_key(
    private: &[u8],
    public: &[u8],
) -> Result<SharedKey, KeyExchangeError> {
    let secret = StaticSecret::from(key_array(private)?);
    let peer = X25519PublicKey::from(key_array(public)?);

    let shared = secret.diffie_hellman(&peer);
    if !shared.was_contributory() {
        return Err(KeyExchangeError::NonContributory);
    }

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; KEY_LEN];
    // Output size matches digest size, cannot fail
    hk.expand(SHARED_KEY_INFO, &mut key)
        .map_err(|_| KeyExchangeError::NonContributory)?;

    Ok(SharedKey(key))
}
