//! Workflow states and the run report

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Txid;

/// Which of the two transactions a step concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Funding,
    Spending,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Funding => write!(f, "funding"),
            Stage::Spending => write!(f, "spending"),
        }
    }
}

/// Position in the fund/spend pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Init,
    AwaitingUtxo,
    Funding,
    FundingSigned,
    FundingBroadcast,
    Spending,
    SpendingSigned,
    SpendingBroadcast,
    Done,
    Failed(String),
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed(_))
    }

    /// True once a transaction may have reached the ledger
    pub fn has_broadcast(&self) -> bool {
        matches!(
            self,
            WorkflowState::FundingBroadcast
                | WorkflowState::Spending
                | WorkflowState::SpendingSigned
                | WorkflowState::SpendingBroadcast
                | WorkflowState::Done
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Failed(reason) => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

/// What a run did, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub started_at: DateTime<Utc>,
    pub transitions: Vec<Transition>,
    pub funding_txid: Option<Txid>,
    pub funding_fee: Option<u64>,
    pub spending_txid: Option<Txid>,
    pub spending_fee: Option<u64>,
}

impl WorkflowReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            transitions: Vec::new(),
            funding_txid: None,
            funding_fee: None,
            spending_txid: None,
            spending_fee: None,
        }
    }

    pub fn record(&mut self, from: WorkflowState, to: WorkflowState) {
        self.transitions.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
    }

    /// States visited after `Init`, in order
    pub fn path(&self) -> Vec<&WorkflowState> {
        self.transitions.iter().map(|t| &t.to).collect()
    }
}

impl Default for WorkflowReport {
    fn default() -> Self {
        Self::new()
    }
}
