//! Content fetching and the final decryption step.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use chainloader_crypto::symmetric;

use crate::errors::ResolveError;
use crate::keeper::{Keeper, KeeperError};

/// Reads file bytes from the keeper, mapping failures to typed errors.
#[derive(Clone)]
pub struct ContentFetcher {
    keeper: Arc<dyn Keeper>,
}

impl ContentFetcher {
    pub fn new(keeper: Arc<dyn Keeper>) -> Self {
        Self { keeper }
    }

    /// Fetch a single value. Any keeper failure becomes `FileNotFound`.
    pub async fn fetch(&self, key: &str) -> Result<Bytes, ResolveError> {
        self.keeper.get_one(key).await.map_err(|source| {
            debug!(key = %key, error = %source, "error fetching file");
            ResolveError::FileNotFound {
                key: key.to_string(),
                source,
            }
        })
    }

    /// Fetch several values in one keeper call.
    ///
    /// The output has one entry per key, in key order; `None` means the key
    /// is unknown. A backend failure fails the whole call.
    pub async fn fetch_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, KeeperError> {
        let values = self.keeper.get_many(keys).await?;
        if values.len() != keys.len() {
            return Err(KeeperError::Backend(format!(
                "get_many returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }
}

/// Apply the envelope's decryption key to fetched content.
///
/// # Arguments
/// * `data` - content as stored in the keeper
/// * `decryption_key` - 32-byte key from the permission envelope
/// * `tx_id` - transaction being resolved
/// * `target_key` - keeper key of `data`, reported on failure
pub fn decrypt_content(
    data: &[u8],
    decryption_key: &[u8],
    tx_id: &str,
    target_key: &str,
) -> Result<Bytes, ResolveError> {
    symmetric::open(decryption_key, data)
        .map(Bytes::from)
        .map_err(|e| {
            debug!(tx_id = %tx_id, key = %target_key, error = %e, "failed to decrypt content");
            ResolveError::Decrypt {
                tx_id: tx_id.to_string(),
                key: Some(target_key.to_string()),
            }
        })
}
