//! Workflow errors

use thiserror::Error;

use super::state::Stage;
use crate::chain::ChainError;
use crate::core::{Address, ScriptError, TransactionError, Txid};
use crate::signer::SignerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("No spendable output of at least {required} at {address}")]
    NoSpendableOutput { address: Address, required: u64 },
    #[error("Ledger error during {stage}: {source}")]
    Chain {
        stage: Stage,
        #[source]
        source: ChainError,
    },
    #[error("Ledger reported txid {got}, expected {expected}")]
    TxidMismatch { expected: Txid, got: Txid },
    #[error("Outcome of {stage} broadcast of {txid} is unknown")]
    AmbiguousOutcome { txid: Txid, stage: Stage },
    #[error("Workflow cancelled before anything was broadcast")]
    Cancelled,
    #[error("Funding transaction {0} has no output to the multisig address")]
    MultisigOutputNotFound(Txid),
    #[error("Workflow already finished")]
    Finished,
    #[error("Signer error: {0}")]
    SignerError(#[from] SignerError),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
}

impl WorkflowError {
    /// True when the ledger answered a broadcast or may still act on one
    pub fn reached_ledger(&self) -> bool {
        matches!(
            self,
            WorkflowError::AmbiguousOutcome { .. } | WorkflowError::TxidMismatch { .. }
        )
    }
}
