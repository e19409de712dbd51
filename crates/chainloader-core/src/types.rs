//! Records carried through the resolution pipeline.

use bytes::Bytes;

use crate::permission::PermissionEnvelope;

/// How a transaction references its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    /// Payload is the keeper key of public content.
    Public,
    /// Payload is the sealed keeper key of a permission envelope.
    Permission,
}

impl TxType {
    /// Wire tag that follows the marker prefix in embedded transaction data.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(TxType::Public),
            1 => Some(TxType::Permission),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            TxType::Public => 0,
            TxType::Permission => 1,
        }
    }
}

/// A ledger transaction as handed to the parser.
#[derive(Clone, Debug, Default)]
pub struct RawTransaction {
    pub tx_id: String,
    /// Network the transaction was observed on
    pub network: String,
    /// Data-carrying outputs, in output order
    pub data_outputs: Vec<Vec<u8>>,
    /// Input addresses, in input order
    pub addresses_from: Vec<String>,
    /// Output addresses, in output order
    pub addresses_to: Vec<String>,
    pub timestamp: Option<u64>,
}

/// Typed view of a transaction. Never mutated after classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedTransaction {
    pub tx_id: String,
    pub tx_type: TxType,
    /// Bytes embedded after the marker prefix and type tag
    pub payload: Vec<u8>,
    pub addresses_from: Vec<String>,
    pub addresses_to: Vec<String>,
    pub timestamp: Option<u64>,
}

impl ParsedTransaction {
    /// Keeper key referenced by a public transaction.
    pub fn public_file_key(&self) -> String {
        hex::encode(&self.payload)
    }
}

/// Input accepted by the loader.
#[derive(Clone, Debug)]
pub enum TxInput {
    /// Unparsed ledger transaction
    Raw(RawTransaction),
    /// Already classified transaction (passed through)
    Parsed(ParsedTransaction),
    /// Progress taken from an earlier `LoadError`, to resume resolution
    Resume(Box<Progress>),
}

impl From<RawTransaction> for TxInput {
    fn from(raw: RawTransaction) -> Self {
        TxInput::Raw(raw)
    }
}

impl From<ParsedTransaction> for TxInput {
    fn from(parsed: ParsedTransaction) -> Self {
        TxInput::Parsed(parsed)
    }
}

impl From<Progress> for TxInput {
    fn from(progress: Progress) -> Self {
        TxInput::Resume(Box::new(progress))
    }
}

/// Working record for one pipeline run.
///
/// Attached to every `LoadError` so callers can see how far resolution got,
/// and fed back through `TxInput::Resume` to skip completed stages.
#[derive(Clone, Debug)]
pub struct Progress {
    pub parsed: ParsedTransaction,
    /// Current lookup key: the public file key, the permission storage key,
    /// and finally the envelope's file key.
    pub key: Option<String>,
    /// Keeper key of the permission envelope
    pub permission_key: Option<String>,
    /// Envelope blob as fetched from the keeper
    pub encrypted_permission: Option<Bytes>,
    pub permission: Option<PermissionEnvelope>,
    /// Content as fetched, before the optional decryption step
    pub encrypted_data: Option<Bytes>,
    pub data: Option<Bytes>,
}

impl Progress {
    pub fn new(parsed: ParsedTransaction) -> Self {
        Self {
            parsed,
            key: None,
            permission_key: None,
            encrypted_permission: None,
            permission: None,
            encrypted_data: None,
            data: None,
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.parsed.tx_id
    }

    /// True once the permission stages no longer need the on-chain payload.
    pub fn has_permission_state(&self) -> bool {
        self.permission.is_some() || self.encrypted_permission.is_some()
    }

    /// Final result, available once both key and data are known.
    pub fn to_result(&self) -> Option<ResolutionResult> {
        Some(ResolutionResult {
            tx_id: self.parsed.tx_id.clone(),
            tx_type: self.parsed.tx_type,
            key: self.key.clone()?,
            data: self.data.clone()?,
            permission: self.permission.clone(),
            encrypted_data: self.encrypted_data.clone(),
        })
    }
}

/// Per-transaction output of a successful load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionResult {
    pub tx_id: String,
    pub tx_type: TxType,
    /// Keeper key the data was read from
    pub key: String,
    pub data: Bytes,
    pub permission: Option<PermissionEnvelope>,
    pub encrypted_data: Option<Bytes>,
}
