//! Loader configuration.
//!
//! Configuration is plain data, usually embedded in the host application's
//! own TOML file:
//!
//! ```toml
//! network = "testnet"
//! prefix = "chainloader"
//! match_policy = "first_distinct"  # "first_distinct" | "reject_ambiguous"
//! max_concurrent = 32              # omit for unbounded
//! prefetch_public = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parties::MatchPolicy;

/// Longest marker prefix accepted; data outputs are small.
pub const MAX_PREFIX_LEN: usize = 32;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Ledger network transactions are expected on
    #[serde(default = "default_network")]
    pub network: String,

    /// Marker prefix identifying application data outputs
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Recipient selection rule
    #[serde(default)]
    pub match_policy: MatchPolicy,

    /// Upper bound on pipelines in flight per `load` call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    /// Read all public content of a batch with one `get_many` up front
    #[serde(default = "default_prefetch_public")]
    pub prefetch_public: bool,
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_prefix() -> String {
    "chainloader".to_string()
}

fn default_prefetch_public() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            prefix: default_prefix(),
            match_policy: MatchPolicy::default(),
            max_concurrent: None,
            prefetch_public: default_prefetch_public(),
        }
    }
}

impl LoaderConfig {
    pub fn new(network: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.is_empty() {
            return Err(ConfigError::ValidationError(
                "network must not be empty".to_string(),
            ));
        }

        if self.prefix.is_empty() || self.prefix.len() > MAX_PREFIX_LEN {
            return Err(ConfigError::ValidationError(format!(
                "prefix must be 1-{} bytes, got {}",
                MAX_PREFIX_LEN,
                self.prefix.len()
            )));
        }

        if self.max_concurrent == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
