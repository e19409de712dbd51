//! Keeper abstraction: the content-addressable store holding file bytes.
//!
//! This module defines the `Keeper` trait and provides an in-memory
//! implementation for testing and embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;

use chainloader_crypto::hash::content_key;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during keeper operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeeperError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("keeper backend failed: {0}")]
    Backend(String),
}

// ============================================================================
// Keeper Trait
// ============================================================================

/// Content-addressable byte store.
#[async_trait]
pub trait Keeper: Send + Sync {
    /// Fetch one value.
    ///
    /// # Returns
    /// * `Ok(bytes)` if found
    /// * `Err(KeeperError::NotFound)` if the key is unknown
    /// * `Err(KeeperError::Backend)` if the store failed
    async fn get_one(&self, key: &str) -> Result<Bytes, KeeperError>;

    /// Fetch several values.
    ///
    /// # Returns
    /// * `Ok(values)` - one entry per key, in key order, `None` for unknown keys
    /// * `Err(KeeperError)` if the store failed; no partial result is returned
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, KeeperError>;

    /// Store a value and return its content key.
    async fn put(&self, data: Bytes) -> Result<String, KeeperError>;
}

// ============================================================================
// In-Memory Keeper Implementation
// ============================================================================

/// Thread-safe in-memory keeper.
///
/// `put` keys values by hex(sha256(bytes)); `insert` accepts any key.
#[derive(Default, Clone)]
pub struct InMemoryKeeper {
    values: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemoryKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory keeper wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store a value under an explicit key.
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let mut values = self.values.write().await;
        values.insert(key.into(), data.into());
    }

    pub async fn remove(&self, key: &str) -> Option<Bytes> {
        let mut values = self.values.write().await;
        values.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl Keeper for InMemoryKeeper {
    async fn get_one(&self, key: &str) -> Result<Bytes, KeeperError> {
        let values = self.values.read().await;
        values
            .get(key)
            .cloned()
            .ok_or_else(|| KeeperError::NotFound(key.to_string()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, KeeperError> {
        let values = self.values.read().await;
        Ok(keys.iter().map(|k| values.get(k).cloned()).collect())
    }

    async fn put(&self, data: Bytes) -> Result<String, KeeperError> {
        let key = content_key(&data);
        let mut values = self.values.write().await;
        values.insert(key.clone(), data);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_one() {
        let keeper = InMemoryKeeper::new();
        let key = keeper.put(Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(key, content_key(b"hello"));
        assert_eq!(keeper.get_one(&key).await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_get_one_missing() {
        let keeper = InMemoryKeeper::new();
        let result = keeper.get_one("abc123").await;
        assert_eq!(result, Err(KeeperError::NotFound("abc123".into())));
    }

    #[tokio::test]
    async fn test_get_many_preserves_order_and_gaps() {
        let keeper = InMemoryKeeper::new();
        keeper.insert("a", &b"1"[..]).await;
        keeper.insert("c", &b"3"[..]).await;

        let keys = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        let values = keeper.get_many(&keys).await.unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_deref(), Some(&b"3"[..]));
        assert!(values[1].is_none());
        assert_eq!(values[2].as_deref(), Some(&b"1"[..]));
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let keeper = InMemoryKeeper::new();
        assert!(keeper.is_empty().await);

        keeper.insert("abc123", &b"hello"[..]).await;
        assert_eq!(keeper.len().await, 1);

        keeper.remove("abc123").await;
        assert!(keeper.get_one("abc123").await.is_err());
    }
}
