//! Mini-Multisig: transaction construction and P2SH multisig spending in Rust
//!
//! This crate provides a small, self-contained engine for a Bitcoin-style
//! UTXO ledger featuring:
//! - secp256k1 keys with deterministic (RFC 6979) ECDSA signing
//! - P2PKH and P2SH scripts with M-of-N multisig redeem scripts
//! - Legacy transaction wire format, txids and signature hashes
//! - Partial signing sessions that several parties can complete
//! - A script interpreter for local verification
//! - An async fund → spend workflow over a pluggable ledger client
//!
//! # Example
//!
//! ```rust
//! use mini_multisig::core::{Network, TransactionBuilder};
//! use mini_multisig::crypto::KeyPair;
//! use mini_multisig::multisig::{MultisigConfig, MultisigWallet};
//!
//! // A 1-of-2 wallet
//! let a = KeyPair::generate(Network::Testnet);
//! let b = KeyPair::generate(Network::Testnet);
//! let config = MultisigConfig::new(1, vec![*a.public_key(), *b.public_key()], None)
//!     .unwrap()
//!     .sorted();
//! let wallet = MultisigWallet::new(config, Network::Testnet).unwrap();
//!
//! // Testnet P2SH addresses start with '2'
//! println!("Multisig address: {}", wallet.address());
//! assert!(wallet.address().to_string().starts_with('2'));
//! ```

pub mod chain;
pub mod core;
pub mod crypto;
pub mod multisig;
pub mod signer;
pub mod workflow;

// Re-export commonly used types
pub use chain::{ChainClient, ChainError, MemoryChain, UtxoReservations};
pub use core::{
    Address, Network, OutPoint, Script, SigHashType, Transaction, TransactionBuilder, Txid,
    UnspentOutput,
};
pub use crypto::{KeyPair, PrivateKey, PublicKey};
pub use multisig::{MultisigConfig, MultisigWallet};
pub use signer::{SigningSession, SigningStatus};
pub use workflow::{FundSpendWorkflow, WorkflowConfig, WorkflowError, WorkflowReport};
