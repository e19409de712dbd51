//! Test harness for chainloader core.
//!
//! Provides an in-memory identity directory, a fixture permission codec and
//! helpers that publish files the way a sending application would, so the
//! loader can be exercised end to end without a ledger or a real keeper.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand_core::{OsRng, RngCore};
use thiserror::Error;

use chainloader_crypto::ecdh::{self, KeyExchangeError};
use chainloader_crypto::symmetric::{self, SymmetricError};
use chainloader_crypto::SharedKey;

use crate::config::{ConfigError, LoaderConfig};
use crate::errors::LoadError;
use crate::keeper::{InMemoryKeeper, Keeper, KeeperError};
use crate::loader::LoaderBuilder;
use crate::parties::{IdentityKey, IdentityLookup, KeyMaterial, LookupError};
use crate::permission::{CodecError, PermissionCodec, PermissionEnvelope};
use crate::types::{ParsedTransaction, ResolutionResult, TxType};

/// Errors from fixture construction.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("keeper: {0}")]
    Keeper(#[from] KeeperError),
    #[error("symmetric: {0}")]
    Symmetric(#[from] SymmetricError),
    #[error("key exchange: {0}")]
    KeyExchange(#[from] KeyExchangeError),
    #[error("identity has no private key")]
    NotOwned,
    #[error("keeper key is not hex")]
    BadKey,
    #[error("file key too long for fixture envelope: {0} bytes")]
    FileKeyTooLong(usize),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("load: {0}")]
    Load(#[from] LoadError),
}

// ============================================================================
// Identity Directory
// ============================================================================

/// In-memory identity directory that records every call it receives.
#[derive(Clone, Default)]
pub struct StaticLookup {
    identities: HashMap<String, IdentityKey>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, key: IdentityKey) -> Self {
        self.identities.insert(address.to_string(), key);
        self
    }

    /// Delay answers for `address`, to shuffle completion order.
    pub fn with_delay(mut self, address: &str, delay: Duration) -> Self {
        self.delays.insert(address.to_string(), delay);
        self
    }

    /// Make lookups for `address` fail with a directory error.
    pub fn failing(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(address).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl IdentityLookup for StaticLookup {
    async fn lookup(&self, address: &str) -> Result<Arc<dyn KeyMaterial>, LookupError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(address.to_string()).or_insert(0) += 1;
        }

        if let Some(delay) = self.delays.get(address) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing.contains(address) {
            return Err(LookupError::Failed(format!("directory unavailable for {address}")));
        }

        match self.identities.get(address) {
            Some(key) => Ok(Arc::new(key.clone())),
            None => Err(LookupError::NotFound(address.to_string())),
        }
    }
}

// ============================================================================
// Fixture Permission Codec
// ============================================================================

/// Fixture envelope format: `seal(shared, len(u16 be) || file_key || decryption_key?)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedPermissionCodec;

/// Seal an envelope in the fixture format.
pub fn seal_permission(
    envelope: &PermissionEnvelope,
    shared_key: &SharedKey,
) -> Result<Vec<u8>, HarnessError> {
    let file_key = envelope.file_key().as_bytes();
    let len = u16::try_from(file_key.len())
        .map_err(|_| HarnessError::FileKeyTooLong(file_key.len()))?;
    let mut body = Vec::with_capacity(2 + file_key.len() + 32);
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(file_key);
    if let Some(key) = envelope.decryption_key() {
        body.extend_from_slice(key);
    }
    Ok(symmetric::seal(shared_key.as_bytes(), &body)?)
}

impl PermissionCodec for SealedPermissionCodec {
    fn recover(
        &self,
        data: &[u8],
        shared_key: &SharedKey,
    ) -> Result<PermissionEnvelope, CodecError> {
        let body = symmetric::open(shared_key.as_bytes(), data).map_err(|_| CodecError::Decrypt)?;

        if body.len() < 2 {
            return Err(CodecError::Malformed("missing file key length".into()));
        }
        let (len, rest) = body.split_at(2);
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        if rest.len() < len {
            return Err(CodecError::Malformed("truncated file key".into()));
        }

        let (file_key, decryption_key) = rest.split_at(len);
        let file_key = std::str::from_utf8(file_key)
            .map_err(|_| CodecError::Malformed("file key is not utf-8".into()))?;
        let decryption_key = (!decryption_key.is_empty()).then(|| decryption_key.to_vec());

        Ok(PermissionEnvelope::new(file_key, decryption_key))
    }
}

// ============================================================================
// Publishing Helpers
// ============================================================================

/// Generate a random 32-byte array.
pub fn rand32() -> [u8; 32] {
    let mut b = [0u8; 32];
    OsRng.fill_bytes(&mut b);
    b
}

/// Encrypt `plaintext` under a fresh key and store it.
///
/// Returns the keeper key and the decryption key.
pub async fn store_encrypted(
    keeper: &dyn Keeper,
    plaintext: &[u8],
) -> Result<(String, Vec<u8>), HarnessError> {
    let key = rand32();
    let sealed = symmetric::seal(&key, plaintext)?;
    let file_key = keeper.put(Bytes::from(sealed)).await?;
    Ok((file_key, key.to_vec()))
}

/// Publish a permission envelope from `sender` to `recipient`.
///
/// Stores the envelope in the keeper and returns the on-chain payload: the
/// envelope's keeper key sealed with the pair's shared key.
pub async fn share(
    keeper: &dyn Keeper,
    sender: &IdentityKey,
    recipient: &IdentityKey,
    envelope: &PermissionEnvelope,
) -> Result<Vec<u8>, HarnessError> {
    let private = sender.private_value().ok_or(HarnessError::NotOwned)?;
    let shared = ecdh::shared_encryption_key(private, recipient.public_value())?;

    let blob = seal_permission(envelope, &shared)?;
    let permission_key = keeper.put(Bytes::from(blob)).await?;
    let raw_key = hex::decode(&permission_key).map_err(|_| HarnessError::BadKey)?;

    Ok(symmetric::seal(shared.as_bytes(), &raw_key)?)
}

/// Public transaction pointing at `file_key`.
pub fn public_tx(tx_id: &str, file_key: &str) -> Result<ParsedTransaction, HarnessError> {
    Ok(ParsedTransaction {
        tx_id: tx_id.to_string(),
        tx_type: TxType::Public,
        payload: hex::decode(file_key).map_err(|_| HarnessError::BadKey)?,
        addresses_from: vec![],
        addresses_to: vec![],
        timestamp: None,
    })
}

/// Permission transaction from `from` to `to` carrying `payload`.
pub fn permission_tx(tx_id: &str, payload: Vec<u8>, from: &str, to: &str) -> ParsedTransaction {
    ParsedTransaction {
        tx_id: tx_id.to_string(),
        tx_type: TxType::Permission,
        payload,
        addresses_from: vec![from.to_string()],
        addresses_to: vec![to.to_string()],
        timestamp: None,
    }
}

// ============================================================================
// Share Flow
// ============================================================================

/// Share `plaintext` between two fresh identities and load it back from the
/// recipient's side.
///
/// With `encrypt` set the file gets its own encryption layer and the
/// envelope carries the decryption key.
pub async fn run_share_flow(
    plaintext: &[u8],
    encrypt: bool,
) -> Result<ResolutionResult, HarnessError> {
    let keeper = InMemoryKeeper::new_shared();
    let sender = IdentityKey::generate();
    let recipient = IdentityKey::generate();

    let envelope = if encrypt {
        let (file_key, key) = store_encrypted(&*keeper, plaintext).await?;
        PermissionEnvelope::new(file_key, Some(key))
    } else {
        let file_key = keeper.put(Bytes::copy_from_slice(plaintext)).await?;
        PermissionEnvelope::new(file_key, None)
    };
    let payload = share(&*keeper, &sender, &recipient, &envelope).await?;

    // Recipient's directory: own identity with private half, sender public only
    let lookup = StaticLookup::new()
        .with("sender", sender.to_public())
        .with("recipient", recipient);
    let loader = LoaderBuilder::new(
        LoaderConfig::default(),
        keeper,
        Arc::new(SealedPermissionCodec),
    )
    .lookup(Arc::new(lookup))
    .build()?;

    let tx = permission_tx("share-tx", payload, "sender", "recipient");
    Ok(loader.load_one(tx.into()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_codec_recovers_envelope() {
        let shared = SharedKey::from_bytes([1u8; 32]);
        let envelope = PermissionEnvelope::new("abc123", Some(vec![9u8; 32]));

        let blob = seal_permission(&envelope, &shared).unwrap();
        let recovered = SealedPermissionCodec.recover(&blob, &shared).unwrap();

        assert_eq!(recovered, envelope);
    }

    #[test]
    fn test_fixture_codec_rejects_wrong_key() {
        let envelope = PermissionEnvelope::new("abc123", None);
        let blob = seal_permission(&envelope, &SharedKey::from_bytes([1u8; 32])).unwrap();

        let result = SealedPermissionCodec.recover(&blob, &SharedKey::from_bytes([2u8; 32]));
        assert_eq!(result, Err(CodecError::Decrypt));
    }

    #[test]
    fn test_oversized_file_key_rejected() {
        let envelope = PermissionEnvelope::new("k".repeat(70_000), None);
        let result = seal_permission(&envelope, &SharedKey::from_bytes([1u8; 32]));
        assert!(matches!(result, Err(HarnessError::FileKeyTooLong(70_000))));
    }

    #[tokio::test]
    async fn test_static_lookup_counts_calls() {
        let lookup = StaticLookup::new()
            .with("me", IdentityKey::generate())
            .failing("down");

        assert!(lookup.lookup("me").await.is_ok());
        assert!(lookup.lookup("me").await.is_ok());
        assert!(matches!(lookup.lookup("down").await, Err(LookupError::Failed(_))));
        assert!(matches!(lookup.lookup("nobody").await, Err(LookupError::NotFound(_))));

        assert_eq!(lookup.calls_for("me"), 2);
        assert_eq!(lookup.total_calls(), 4);
    }

    #[tokio::test]
    async fn test_share_requires_owned_sender() {
        let keeper = InMemoryKeeper::new();
        let stranger = IdentityKey::generate().to_public();
        let envelope = PermissionEnvelope::new("abc123", None);

        let result = share(&keeper, &stranger, &IdentityKey::generate(), &envelope).await;
        assert!(matches!(result, Err(HarnessError::NotOwned)));
    }
}
