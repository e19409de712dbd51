//! Permission envelope recovery.
//!
//! A permission transaction carries, sealed under the sender/recipient shared
//! key, the keeper key of a permission envelope. The envelope in turn names
//! the file and, optionally, the key that decrypts it:
//!
//! ```text
//! payload --open(shared)--> permission key --keeper--> envelope blob
//!         --codec.recover(shared)--> { file_key, decryption_key? }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use chainloader_crypto::{symmetric, SharedKey};

use crate::content::ContentFetcher;
use crate::errors::ResolveError;
use crate::types::Progress;

// ============================================================================
// Envelope and Codec
// ============================================================================

/// Recovered permission envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct PermissionEnvelope {
    file_key: String,
    decryption_key: Option<Vec<u8>>,
}

impl PermissionEnvelope {
    pub fn new(file_key: impl Into<String>, decryption_key: Option<Vec<u8>>) -> Self {
        Self {
            file_key: file_key.into(),
            decryption_key,
        }
    }

    /// Keeper key of the shared file.
    pub fn file_key(&self) -> &str {
        &self.file_key
    }

    /// Key for the file's own encryption layer, if it has one.
    pub fn decryption_key(&self) -> Option<&[u8]> {
        self.decryption_key.as_deref()
    }
}

impl std::fmt::Debug for PermissionEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEnvelope")
            .field("file_key", &self.file_key)
            .field("encrypted", &self.decryption_key.is_some())
            .finish()
    }
}

/// Errors reported by a permission codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("permission decryption failed")]
    Decrypt,

    #[error("malformed permission: {0}")]
    Malformed(String),
}

/// Binary format of permission envelopes.
pub trait PermissionCodec: Send + Sync {
    /// Recover an envelope from its stored bytes using the shared key.
    fn recover(
        &self,
        data: &[u8],
        shared_key: &SharedKey,
    ) -> Result<PermissionEnvelope, CodecError>;
}

// ============================================================================
// Permission Resolver
// ============================================================================

/// Open the on-chain payload, yielding the hex keeper key of the envelope.
pub fn decrypt_permission_key(
    payload: &[u8],
    shared_key: &SharedKey,
    tx_id: &str,
) -> Result<String, ResolveError> {
    symmetric::open(shared_key.as_bytes(), payload)
        .map(hex::encode)
        .map_err(|e| {
            debug!(tx_id = %tx_id, error = %e, "failed to decrypt tx payload");
            ResolveError::Decrypt {
                tx_id: tx_id.to_string(),
                key: None,
            }
        })
}

/// Walks a permission transaction from payload to recovered envelope.
#[derive(Clone)]
pub struct PermissionResolver {
    codec: Arc<dyn PermissionCodec>,
    fetcher: ContentFetcher,
}

impl PermissionResolver {
    pub fn new(codec: Arc<dyn PermissionCodec>, fetcher: ContentFetcher) -> Self {
        Self { codec, fetcher }
    }

    /// Resolve the envelope for `progress`, recording each stage on it.
    ///
    /// Stages already present on `progress` are not repeated: a recovered
    /// envelope is returned as is, and a fetched envelope blob skips payload
    /// decryption and the keeper read.
    pub async fn resolve(
        &self,
        progress: &mut Progress,
        shared_key: &SharedKey,
    ) -> Result<PermissionEnvelope, ResolveError> {
        if let Some(permission) = &progress.permission {
            return Ok(permission.clone());
        }

        let blob = match progress.encrypted_permission.clone() {
            Some(blob) => {
                debug!(
                    tx_id = %progress.tx_id(),
                    "have encrypted permission, skipping payload decryption"
                );
                blob
            }
            None => {
                let permission_key = decrypt_permission_key(
                    &progress.parsed.payload,
                    shared_key,
                    progress.tx_id(),
                )?;
                progress.key = Some(permission_key.clone());
                progress.permission_key = Some(permission_key.clone());

                let blob = self.fetcher.fetch(&permission_key).await?;
                progress.encrypted_permission = Some(blob.clone());
                blob
            }
        };

        let permission = self.codec.recover(&blob, shared_key).map_err(|source| {
            let key = progress
                .permission_key
                .clone()
                .or_else(|| progress.key.clone())
                .unwrap_or_else(|| progress.tx_id().to_string());
            debug!(key = %key, error = %source, "failed to recover permission from raw data");
            ResolveError::InvalidPermission { key, source }
        })?;

        progress.key = Some(permission.file_key().to_string());
        progress.permission = Some(permission.clone());
        Ok(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::harness::{seal_permission, SealedPermissionCodec};
    use crate::keeper::{InMemoryKeeper, Keeper};
    use crate::types::{ParsedTransaction, TxType};
    use bytes::Bytes;

    fn shared() -> SharedKey {
        SharedKey::from_bytes([3u8; 32])
    }

    fn progress_for(payload: Vec<u8>) -> Progress {
        Progress::new(ParsedTransaction {
            tx_id: "perm-tx".into(),
            tx_type: TxType::Permission,
            payload,
            addresses_from: vec!["a".into()],
            addresses_to: vec!["b".into()],
            timestamp: None,
        })
    }

    async fn setup(envelope: &PermissionEnvelope) -> (Arc<InMemoryKeeper>, Vec<u8>, String) {
        let keeper = InMemoryKeeper::new_shared();
        let blob = seal_permission(envelope, &shared()).unwrap();
        let permission_key = keeper.put(Bytes::from(blob)).await.unwrap();
        let raw_key = hex::decode(&permission_key).unwrap();
        let payload = symmetric::seal(shared().as_bytes(), &raw_key).unwrap();
        (keeper, payload, permission_key)
    }

    fn resolver(keeper: Arc<InMemoryKeeper>) -> PermissionResolver {
        PermissionResolver::new(
            Arc::new(SealedPermissionCodec),
            ContentFetcher::new(keeper),
        )
    }

    #[tokio::test]
    async fn test_resolves_envelope_and_records_stages() {
        let envelope = PermissionEnvelope::new("abc123", None);
        let (keeper, payload, permission_key) = setup(&envelope).await;
        let mut progress = progress_for(payload);

        let recovered = resolver(keeper).resolve(&mut progress, &shared()).await.unwrap();

        assert_eq!(recovered, envelope);
        assert_eq!(progress.permission_key.as_deref(), Some(permission_key.as_str()));
        assert_eq!(progress.key.as_deref(), Some("abc123"));
        assert!(progress.encrypted_permission.is_some());
    }

    #[tokio::test]
    async fn test_cached_envelope_is_returned_without_fetching() {
        let envelope = PermissionEnvelope::new("abc123", Some(vec![1u8; 32]));
        let mut progress = progress_for(vec![0u8; 60]);
        progress.permission = Some(envelope.clone());

        // Empty keeper: any fetch would fail
        let recovered = resolver(InMemoryKeeper::new_shared())
            .resolve(&mut progress, &shared())
            .await
            .unwrap();

        assert_eq!(recovered, envelope);
    }

    #[tokio::test]
    async fn test_wrong_shared_key_fails_payload_decryption() {
        let envelope = PermissionEnvelope::new("abc123", None);
        let (keeper, payload, _) = setup(&envelope).await;
        let mut progress = progress_for(payload);

        let err = resolver(keeper)
            .resolve(&mut progress, &SharedKey::from_bytes([4u8; 32]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Decrypt);
        assert!(progress.permission_key.is_none());
    }

    #[tokio::test]
    async fn test_missing_envelope_is_file_not_found() {
        let envelope = PermissionEnvelope::new("abc123", None);
        let (keeper, payload, permission_key) = setup(&envelope).await;
        keeper.remove(&permission_key).await;
        let mut progress = progress_for(payload);

        let err = resolver(keeper).resolve(&mut progress, &shared()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.key(), Some(permission_key.as_str()));
    }

    #[tokio::test]
    async fn test_forged_envelope_is_invalid_permission() {
        let keeper = InMemoryKeeper::new_shared();
        let permission_key = keeper.put(Bytes::from_static(b"not an envelope")).await.unwrap();
        let raw_key = hex::decode(&permission_key).unwrap();
        let payload = symmetric::seal(shared().as_bytes(), &raw_key).unwrap();
        let mut progress = progress_for(payload);

        let err = resolver(keeper).resolve(&mut progress, &shared()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidPermission);
        assert_eq!(err.key(), Some(permission_key.as_str()));
        assert!(progress.encrypted_permission.is_some());
        assert!(progress.permission.is_none());
    }

    #[tokio::test]
    async fn test_resumed_blob_without_keys_reports_tx_id() {
        let mut progress = progress_for(vec![]);
        progress.encrypted_permission = Some(Bytes::from_static(b"not an envelope"));

        let err = resolver(InMemoryKeeper::new_shared())
            .resolve(&mut progress, &shared())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidPermission);
        assert_eq!(err.key(), Some("perm-tx"));
    }
}
