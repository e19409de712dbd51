//! Error types for chainloader core.
//!
//! Every failure is local to one transaction. `ResolveError` says what went
//! wrong; `LoadError` adds the progress record as it stood at failure time.

use thiserror::Error;

use crate::keeper::KeeperError;
use crate::permission::CodecError;
use crate::types::Progress;

// ============================================================================
// Resolution Errors
// ============================================================================

/// Why a single transaction could not be resolved.
#[derive(Debug, Error, Clone)]
pub enum ResolveError {
    /// Parser found no marker-prefixed data
    #[error("no data for tx: {tx_id}")]
    NoData { tx_id: String },

    /// Parsed record is missing required fields
    #[error("not enough info for tx: {tx_id}")]
    NotEnoughInfo { tx_id: String },

    /// Permission transaction without a resolvable sender/recipient pair
    #[error("participants not found for tx: {tx_id}")]
    ParticipantsNotFound { tx_id: String },

    /// Neither party offered a private/public pairing
    #[error("failed to derive shared key for tx: {tx_id}")]
    Ecdh { tx_id: String },

    /// Payload or content decryption failed, or the payload uses the legacy layout
    #[error("decryption failed for tx: {tx_id}")]
    Decrypt { tx_id: String, key: Option<String> },

    /// Permission envelope could not be recovered
    #[error("invalid permission for key {key}: {source}")]
    InvalidPermission {
        key: String,
        #[source]
        source: CodecError,
    },

    /// Keeper failed or had nothing for a required key
    #[error("file not found for key {key}: {source}")]
    FileNotFound {
        key: String,
        #[source]
        source: KeeperError,
    },
}

/// Fieldless discriminant of [`ResolveError`], for matching and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoData,
    NotEnoughInfo,
    ParticipantsNotFound,
    Ecdh,
    Decrypt,
    InvalidPermission,
    FileNotFound,
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::NoData { .. } => ErrorKind::NoData,
            ResolveError::NotEnoughInfo { .. } => ErrorKind::NotEnoughInfo,
            ResolveError::ParticipantsNotFound { .. } => ErrorKind::ParticipantsNotFound,
            ResolveError::Ecdh { .. } => ErrorKind::Ecdh,
            ResolveError::Decrypt { .. } => ErrorKind::Decrypt,
            ResolveError::InvalidPermission { .. } => ErrorKind::InvalidPermission,
            ResolveError::FileNotFound { .. } => ErrorKind::FileNotFound,
        }
    }

    /// Storage key the error refers to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            ResolveError::Decrypt { key, .. } => key.as_deref(),
            ResolveError::InvalidPermission { key, .. } => Some(key.as_str()),
            ResolveError::FileNotFound { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// Load Error (error + progress)
// ============================================================================

/// Error returned by the loader for one input transaction.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LoadError {
    pub error: ResolveError,
    /// The pipeline's working record at failure time. `None` only when the
    /// transaction could not be parsed at all.
    pub progress: Option<Box<Progress>>,
}

impl LoadError {
    pub fn new(error: ResolveError) -> Self {
        Self {
            error,
            progress: None,
        }
    }

    /// Attach progress unless some is already attached.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        if self.progress.is_none() {
            self.progress = Some(Box::new(progress));
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn key(&self) -> Option<&str> {
        self.error.key()
    }

    pub fn tx_id(&self) -> Option<&str> {
        match &self.error {
            ResolveError::NoData { tx_id }
            | ResolveError::NotEnoughInfo { tx_id }
            | ResolveError::ParticipantsNotFound { tx_id }
            | ResolveError::Ecdh { tx_id }
            | ResolveError::Decrypt { tx_id, .. } => Some(tx_id.as_str()),
            _ => self.progress.as_deref().map(Progress::tx_id),
        }
    }
}

impl From<ResolveError> for LoadError {
    fn from(error: ResolveError) -> Self {
        Self::new(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParsedTransaction, TxType};

    fn progress(tx_id: &str) -> Progress {
        Progress::new(ParsedTransaction {
            tx_id: tx_id.into(),
            tx_type: TxType::Permission,
            payload: vec![],
            addresses_from: vec![],
            addresses_to: vec![],
            timestamp: None,
        })
    }

    #[test]
    fn test_display_carries_key() {
        let err = ResolveError::FileNotFound {
            key: "abc123".into(),
            source: KeeperError::NotFound("abc123".into()),
        };
        assert!(err.to_string().contains("abc123"));
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.key(), Some("abc123"));
    }

    #[test]
    fn test_progress_is_not_overwritten() {
        let err = LoadError::new(ResolveError::Ecdh { tx_id: "a".into() })
            .with_progress(progress("first"))
            .with_progress(progress("second"));

        assert_eq!(err.progress.unwrap().tx_id(), "first");
    }

    #[test]
    fn test_tx_id_falls_back_to_progress() {
        let err = LoadError::new(ResolveError::FileNotFound {
            key: "k".into(),
            source: KeeperError::Backend("down".into()),
        })
        .with_progress(progress("tx9"));

        assert_eq!(err.tx_id(), Some("tx9"));
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }
}
