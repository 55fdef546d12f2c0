//! Fund → spend workflow
//!
//! An explicit state machine that funds a P2SH multisig address from a
//! single-key address and then spends the multisig output, broadcasting
//! each transaction through a [`ChainClient`](crate::chain::ChainClient).

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use config::{ConfigError, WorkflowConfig};
pub use error::WorkflowError;
pub use orchestrator::FundSpendWorkflow;
pub use state::{Stage, Transition, WorkflowReport, WorkflowState};
