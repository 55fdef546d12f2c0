//! Ledger access
//!
//! - [`ChainClient`]: the interface the workflow talks to
//! - [`MemoryChain`]: an in-memory ledger that validates what it accepts
//! - [`UtxoReservations`]: outputs claimed by in-flight workflows

pub mod client;
pub mod memory;
pub mod reservations;

pub use client::{ChainClient, ChainError};
pub use memory::MemoryChain;
pub use reservations::UtxoReservations;
