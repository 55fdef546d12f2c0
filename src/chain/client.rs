//! Ledger collaborator interface

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{Address, Txid, UnspentOutput};

/// Errors reported by a ledger backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Unspent output lookup unavailable: {0}")]
    LookupUnavailable(String),
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),
}

/// Access to a ledger: unspent-output lookup and transaction broadcast
///
/// Implementations must be shareable across workflows running concurrently.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Unspent outputs currently locked to `address`
    async fn fetch_unspent_outputs(&self, address: &Address)
        -> Result<Vec<UnspentOutput>, ChainError>;

    /// Submit a serialized transaction, returning the ledger's id for it
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, ChainError>;
}
