//! Transaction classification.
//!
//! Turns loader input into a validated `Progress` record. Raw transactions go
//! through a `TxParser`; parsed and resumed records pass straight through
//! validation.

use std::sync::Arc;

use tracing::debug;

use chainloader_crypto::symmetric::sealed_len;

use crate::errors::{LoadError, ResolveError};
use crate::types::{ParsedTransaction, Progress, RawTransaction, TxInput, TxType};

/// Size of a permission payload: a 32-byte keeper key sealed with the shared key.
pub const ENCRYPTED_KEY_LEN: usize = sealed_len(32);

/// Size of the legacy permission payload, which cannot be opened safely.
pub const LEGACY_PERMISSION_LEN: usize = 20;

/// Extracts marker-prefixed data from ledger transactions.
pub trait TxParser: Send + Sync {
    /// Returns `None` when the transaction carries no recognised data.
    fn parse(
        &self,
        raw: &RawTransaction,
        network: &str,
        prefix: &str,
    ) -> Option<ParsedTransaction>;
}

/// Parser for data outputs laid out as `prefix || type tag || payload`.
///
/// The first data output starting with the prefix wins. Transactions from
/// another network are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerParser;

impl TxParser for MarkerParser {
    fn parse(
        &self,
        raw: &RawTransaction,
        network: &str,
        prefix: &str,
    ) -> Option<ParsedTransaction> {
        if raw.network != network {
            return None;
        }

        let prefix = prefix.as_bytes();
        raw.data_outputs.iter().find_map(|data| {
            let rest = data.strip_prefix(prefix)?;
            let (tag, payload) = rest.split_first()?;
            Some(ParsedTransaction {
                tx_id: raw.tx_id.clone(),
                tx_type: TxType::from_tag(*tag)?,
                payload: payload.to_vec(),
                addresses_from: raw.addresses_from.clone(),
                addresses_to: raw.addresses_to.clone(),
                timestamp: raw.timestamp,
            })
        })
    }
}

/// Build the data output `MarkerParser` understands.
pub fn encode_marker(prefix: &str, tx_type: TxType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 1 + payload.len());
    out.extend_from_slice(prefix.as_bytes());
    out.push(tx_type.tag());
    out.extend_from_slice(payload);
    out
}

/// Check that a parsed record has what its type needs.
pub fn validate(parsed: &ParsedTransaction) -> Result<(), ResolveError> {
    if parsed.tx_id.is_empty() {
        return Err(ResolveError::NotEnoughInfo {
            tx_id: parsed.tx_id.clone(),
        });
    }

    match parsed.tx_type {
        TxType::Public if parsed.payload.is_empty() => Err(ResolveError::NotEnoughInfo {
            tx_id: parsed.tx_id.clone(),
        }),
        TxType::Permission if parsed.payload.len() != ENCRYPTED_KEY_LEN => {
            if parsed.payload.len() == LEGACY_PERMISSION_LEN {
                debug!(tx_id = %parsed.tx_id, "legacy permission payload, not decryptable");
            }
            Err(ResolveError::Decrypt {
                tx_id: parsed.tx_id.clone(),
                key: None,
            })
        }
        _ => Ok(()),
    }
}

/// Normalizes loader input into validated progress records.
#[derive(Clone)]
pub struct Classifier {
    parser: Arc<dyn TxParser>,
    network: String,
    prefix: String,
}

impl Classifier {
    pub fn new(
        parser: Arc<dyn TxParser>,
        network: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            parser,
            network: network.into(),
            prefix: prefix.into(),
        }
    }

    pub fn classify(&self, input: TxInput) -> Result<Progress, LoadError> {
        let progress = match input {
            TxInput::Resume(progress) => *progress,
            TxInput::Parsed(parsed) => Progress::new(parsed),
            TxInput::Raw(raw) => match self.parser.parse(&raw, &self.network, &self.prefix) {
                Some(parsed) => Progress::new(parsed),
                None => {
                    debug!(tx_id = %raw.tx_id, "no marker data in transaction");
                    return Err(LoadError::new(ResolveError::NoData { tx_id: raw.tx_id }));
                }
            },
        };

        // Once the envelope blob is known the payload is no longer needed
        if !progress.has_permission_state() {
            if let Err(e) = validate(&progress.parsed) {
                return Err(LoadError::new(e).with_progress(progress));
            }
        }

        Ok(progress)
    }
}
