//! Chainloader Core - resolve files referenced by ledger transactions.
//!
//! This crate implements:
//! - Transaction classification (public vs permission)
//! - Party resolution with per-batch lookup deduplication
//! - Permission envelope recovery over an ECDH shared key
//! - Content fetching and optional decryption
//! - Order-preserving, failure-isolating batch orchestration

#![forbid(unsafe_code)]

// Pipeline stages
pub mod classify;
pub mod parties;
pub mod permission;
pub mod content;

// Orchestration
pub mod loader;

// Infrastructure
pub mod keeper;
pub mod config;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

pub use classify::{Classifier, MarkerParser, TxParser};
pub use config::{ConfigError, LoaderConfig};
pub use errors::{ErrorKind, LoadError, ResolveError};
pub use keeper::{InMemoryKeeper, Keeper, KeeperError};
pub use loader::{LoadObserver, Loader, LoaderBuilder, LoaderStats, LoaderStatsSnapshot};
pub use parties::{IdentityKey, IdentityLookup, KeyMaterial, LookupError, MatchPolicy};
pub use permission::{CodecError, PermissionCodec, PermissionEnvelope};
pub use types::{ParsedTransaction, Progress, RawTransaction, ResolutionResult, TxInput, TxType};
