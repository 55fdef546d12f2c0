//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Scripts (P2PKH, P2SH, bare multisig redeem scripts)
//! - Addresses (Base58Check, mainnet and testnet)
//! - Transactions (legacy wire format, txid, construction)
//! - Signature hashes (all legacy hash types)
//! - Script interpreter for local verification

pub mod address;
pub mod encode;
pub mod interpreter;
pub mod script;
pub mod sighash;
pub mod transaction;

pub use address::{Address, AddressError, AddressKind, Network};
pub use encode::{read_compact_size, write_compact_size};
pub use interpreter::{verify_input, MAX_PUBKEYS_PER_MULTISIG};
pub use script::{
    address_from_script, build_multisig_redeem_script, opcodes, parse_multisig,
    script_hash_locking_script, Instruction, Instructions, Script, ScriptBuilder, ScriptError,
    MAX_MULTISIG_KEYS, MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE,
};
pub use sighash::{compute_signature_hash, SigHashType, SignatureHash};
pub use transaction::{
    new_transaction, BuiltTransaction, Destination, OutPoint, Payment, Transaction,
    TransactionBuilder, TransactionError, TxIn, TxOut, Txid, UnspentOutput, DUST_THRESHOLD,
    MAX_MONEY, SEQUENCE_FINAL, TX_VERSION,
};
