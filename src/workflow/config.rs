//! Workflow configuration

use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Network, ScriptError, SigHashType};
use crate::crypto::PublicKey;
use crate::multisig::{MultisigConfig, MultisigWallet};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Parameters of one fund/spend run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub network: Network,
    /// Amount locked into the multisig output
    pub fund_amount: u64,
    /// Fee left by the funding transaction
    pub funding_fee: u64,
    /// Fee left by the spending transaction
    pub spending_fee: u64,
    /// Signatures required to spend (M)
    pub threshold: usize,
    /// Sort signer keys before building the redeem script
    pub sort_keys: bool,
    pub sighash_type: SigHashType,
    /// How long to wait for each broadcast before giving up
    pub broadcast_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            fund_amount: 1000,
            funding_fee: 0,
            spending_fee: 0,
            threshold: 1,
            sort_keys: true,
            sighash_type: SigHashType::All,
            broadcast_timeout_ms: 30_000,
        }
    }
}

impl WorkflowConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::Invalid("threshold must be at least 1".into()));
        }
        if self.spending_fee >= self.fund_amount {
            return Err(ConfigError::Invalid(format!(
                "spending fee {} leaves nothing of {}",
                self.spending_fee, self.fund_amount
            )));
        }
        if self.broadcast_timeout_ms == 0 {
            return Err(ConfigError::Invalid("broadcast timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Value the spending transaction sends on
    pub fn spend_amount(&self) -> u64 {
        self.fund_amount.saturating_sub(self.spending_fee)
    }

    /// Multisig wallet over `signers` with this run's threshold and key order
    pub fn multisig_wallet(&self, signers: Vec<PublicKey>) -> Result<MultisigWallet, ScriptError> {
        let mut config = MultisigConfig::new(self.threshold, signers, None)?;
        if self.sort_keys {
            config = config.sorted();
        }
        MultisigWallet::new(config, self.network)
    }
}
