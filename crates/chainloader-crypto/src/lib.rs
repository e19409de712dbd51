//! Cryptographic primitives used by the chainloader pipeline.
//!
//! - `ecdh`: x25519 shared-key derivation (HKDF-SHA256 over the DH output)
//! - `symmetric`: ChaCha20Poly1305 sealing with a random nonce prefix
//! - `hash`: content addressing for keeper keys
//! - `utils`: constant-time comparison helpers

#![forbid(unsafe_code)]

pub mod ecdh;
pub mod hash;
pub mod symmetric;
pub mod utils;

pub use ecdh::{shared_encryption_key, KeyExchangeError, SharedKey, KEY_LEN};
pub use symmetric::{open, seal, SymmetricError, NONCE_LEN, TAG_LEN};

#[cfg(test)]
mod proptests;
