//! Transaction model
//!
//! Implements the UTXO transaction structure, construction with amount
//! validation, and the implicit fee accounting.
//! - Inputs reference previous outputs by (txid, vout)
//! - Outputs carry an amount and a locking script
//! - Whatever the outputs do not claim is the fee, and it is always reported

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::address::Address;
use super::encode;
use super::script::Script;
use crate::crypto::double_sha256;

// =============================================================================
// Constants
// =============================================================================

/// Transaction version used for new transactions
pub const TX_VERSION: i32 = 1;

/// Sequence number that disables locktime
pub const SEQUENCE_FINAL: u32 = 0xFFFFFFFF;

/// Total supply cap, no single amount may exceed it
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Change below this is not worth an output and goes to the fee instead
pub const DUST_THRESHOLD: u64 = 546;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Transaction has no outputs")]
    NoOutputs,
    #[error("Amount {0} exceeds the money supply")]
    AmountTooLarge(u64),
    #[error("Output {0} is spent twice")]
    DuplicateInput(OutPoint),
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("Input index {index} out of range ({inputs} inputs)")]
    InputIndexOutOfRange { index: usize, inputs: usize },
    #[error("Previous output count {got} does not match input count {expected}")]
    PrevoutMismatch { expected: usize, got: usize },
    #[error("Decode error: {0}")]
    Decode(String),
}

// =============================================================================
// Transaction ID
// =============================================================================

/// Double SHA-256 of a serialized transaction
///
/// Stored in hashing order; displayed byte-reversed like block explorers do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid([u8; 32]);

impl Txid {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self)
    }
}

impl FromStr for Txid {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| TransactionError::Decode(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TransactionError::Decode(format!(
                "txid must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        out.reverse();
        Ok(Self(out))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Inputs, Outputs, UTXO
// =============================================================================

/// Reference to an output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Output being spent
    pub previous_output: OutPoint,
    /// Unlocking script, empty until signed
    pub script_sig: Script,
    /// Sequence number (SEQUENCE_FINAL disables locktime for this input)
    pub sequence: u32,
}

impl TxIn {
    /// Unsigned input spending `previous_output`
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: Script::new(),
            sequence: SEQUENCE_FINAL,
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in the ledger's base unit
    pub value: u64,
    /// Locking script
    pub script_pubkey: Script,
}

/// Unspent Transaction Output (UTXO)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    /// Locking script the spender must satisfy
    pub script_pubkey: Script,
}

/// Where a payment goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Address(Address),
    Script(Script),
}

impl Destination {
    pub fn script_pubkey(&self) -> Script {
        match self {
            Destination::Address(address) => address.script_pubkey(),
            Destination::Script(script) => script.clone(),
        }
    }
}

/// A requested output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub destination: Destination,
    pub amount: u64,
}

impl Payment {
    pub fn to_address(address: Address, amount: u64) -> Self {
        Self {
            destination: Destination::Address(address),
            amount,
        }
    }

    pub fn to_script(script: Script, amount: u64) -> Self {
        Self {
            destination: Destination::Script(script),
            amount,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction in its legacy (non-witness) form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Canonical wire encoding
    pub fn serialize(&self) -> Vec<u8> {
        encode::serialize(self)
    }

    /// Parse the canonical wire encoding
    pub fn deserialize(data: &[u8]) -> Result<Self, TransactionError> {
        encode::deserialize(data)
    }

    /// Transaction ID: double SHA-256 of the serialization
    ///
    /// Changes whenever an unlocking script changes, so it is only final once
    /// every input is signed.
    pub fn txid(&self) -> Txid {
        Txid(double_sha256(&self.serialize()))
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    /// Get total output amount
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Fee paid given the outputs this transaction spends, in input order
    pub fn fee(&self, prevouts: &[UnspentOutput]) -> Result<u64, TransactionError> {
        if prevouts.len() != self.inputs.len() {
            return Err(TransactionError::PrevoutMismatch {
                expected: self.inputs.len(),
                got: prevouts.len(),
            });
        }
        let available = checked_sum(prevouts.iter().map(|p| p.value))?;
        let required = checked_sum(self.outputs.iter().map(|o| o.value))?;
        available
            .checked_sub(required)
            .ok_or(TransactionError::InsufficientFunds {
                available,
                required,
            })
    }
}

fn checked_sum(amounts: impl Iterator<Item = u64>) -> Result<u64, TransactionError> {
    let mut total: u64 = 0;
    for amount in amounts {
        if amount > MAX_MONEY {
            return Err(TransactionError::AmountTooLarge(amount));
        }
        total = total
            .checked_add(amount)
            .filter(|t| *t <= MAX_MONEY)
            .ok_or(TransactionError::AmountTooLarge(amount))?;
    }
    Ok(total)
}

// =============================================================================
// Construction
// =============================================================================

/// An unsigned transaction together with what it spends and what it leaves
/// as fee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    pub transaction: Transaction,
    /// Spent outputs, aligned with `transaction.inputs`
    pub prevouts: Vec<UnspentOutput>,
    /// sum(inputs) - sum(outputs)
    pub fee: u64,
}

/// Assemble an unsigned transaction
///
/// Any remainder not assigned to an output is the fee; it is returned in
/// [`BuiltTransaction::fee`] so callers can catch an accidental large fee.
pub fn new_transaction(
    inputs: &[UnspentOutput],
    outputs: &[Payment],
) -> Result<BuiltTransaction, TransactionError> {
    if inputs.is_empty() {
        return Err(TransactionError::NoInputs);
    }
    if outputs.is_empty() {
        return Err(TransactionError::NoOutputs);
    }

    let mut seen = HashSet::new();
    for utxo in inputs {
        if !seen.insert(utxo.outpoint) {
            return Err(TransactionError::DuplicateInput(utxo.outpoint));
        }
    }

    let transaction = Transaction {
        version: TX_VERSION,
        inputs: inputs.iter().map(|u| TxIn::new(u.outpoint)).collect(),
        outputs: outputs
            .iter()
            .map(|p| TxOut {
                value: p.amount,
                script_pubkey: p.destination.script_pubkey(),
            })
            .collect(),
        lock_time: 0,
    };

    let fee = transaction.fee(inputs)?;
    Ok(BuiltTransaction {
        transaction,
        prevouts: inputs.to_vec(),
        fee,
    })
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for creating transactions with change handling
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    inputs: Vec<UnspentOutput>,
    outputs: Vec<Payment>,
    fee: u64,
    change: Option<Address>,
    lock_time: u32,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input from a UTXO
    pub fn add_input(mut self, utxo: &UnspentOutput) -> Self {
        self.inputs.push(utxo.clone());
        self
    }

    /// Pay an address
    pub fn add_output(mut self, address: &Address, amount: u64) -> Self {
        self.outputs.push(Payment::to_address(*address, amount));
        self
    }

    /// Pay an arbitrary locking script
    pub fn add_script_output(mut self, script: Script, amount: u64) -> Self {
        self.outputs.push(Payment::to_script(script, amount));
        self
    }

    /// Fee to leave when a change output is computed
    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    /// Send whatever remains after outputs and fee back to `address`
    pub fn change(mut self, address: &Address) -> Self {
        self.change = Some(*address);
        self
    }

    pub fn lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = lock_time;
        self
    }

    /// Build without signing
    pub fn build(mut self) -> Result<BuiltTransaction, TransactionError> {
        let available = checked_sum(self.inputs.iter().map(|u| u.value))?;
        let sent = checked_sum(self.outputs.iter().map(|p| p.amount))?;
        let required = sent
            .checked_add(self.fee)
            .ok_or(TransactionError::AmountTooLarge(self.fee))?;
        if required > available {
            return Err(TransactionError::InsufficientFunds {
                available,
                required,
            });
        }

        if let Some(change) = self.change {
            let amount = available - required;
            // Dust change is left to the fee
            if amount >= DUST_THRESHOLD {
                self.outputs.push(Payment::to_address(change, amount));
            }
        }

        let mut built = new_transaction(&self.inputs, &self.outputs)?;
        built.transaction.lock_time = self.lock_time;
        Ok(built)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Network;
    use crate::crypto::KeyPair;

    fn utxo(byte: u8, vout: u32, value: u64, owner: &Address) -> UnspentOutput {
        UnspentOutput {
            outpoint: OutPoint::new(Txid::from_bytes([byte; 32]), vout),
            value,
            script_pubkey: owner.script_pubkey(),
        }
    }

    #[test]
    fn test_txid_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let txid = Txid::from_bytes(bytes);
        let text = txid.to_string();
        assert!(text.ends_with("ab"));
        assert_eq!(text.parse::<Txid>().unwrap(), txid);
    }

    #[test]
    fn test_new_transaction_reports_fee() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let dest = KeyPair::generate(Network::Testnet).address();
        let inputs = vec![utxo(1, 0, 100_000, &owner)];

        let built =
            new_transaction(&inputs, &[Payment::to_address(dest, 60_000)]).unwrap();
        assert_eq!(built.fee, 40_000);
        assert_eq!(built.transaction.total_output() + built.fee, 100_000);
        assert_eq!(built.transaction.inputs[0].previous_output, inputs[0].outpoint);
        assert!(built.transaction.inputs[0].script_sig.is_empty());
    }

    #[test]
    fn test_new_transaction_validation() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let inputs = vec![utxo(1, 0, 1_000, &owner)];

        assert_eq!(
            new_transaction(&[], &[Payment::to_address(owner, 1)]),
            Err(TransactionError::NoInputs)
        );
        assert_eq!(
            new_transaction(&inputs, &[]),
            Err(TransactionError::NoOutputs)
        );
        assert_eq!(
            new_transaction(&inputs, &[Payment::to_address(owner, 1_001)]),
            Err(TransactionError::InsufficientFunds {
                available: 1_000,
                required: 1_001
            })
        );
        assert_eq!(
            new_transaction(&inputs, &[Payment::to_address(owner, MAX_MONEY + 1)]),
            Err(TransactionError::AmountTooLarge(MAX_MONEY + 1))
        );

        let doubled = vec![inputs[0].clone(), inputs[0].clone()];
        assert_eq!(
            new_transaction(&doubled, &[Payment::to_address(owner, 1)]),
            Err(TransactionError::DuplicateInput(inputs[0].outpoint))
        );
    }

    #[test]
    fn test_conservation_over_many_splits() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let inputs = vec![utxo(1, 0, 70_000, &owner), utxo(2, 3, 30_000, &owner)];
        for sent in [0u64, 1, 546, 50_000, 99_999, 100_000] {
            let built = new_transaction(&inputs, &[Payment::to_address(owner, sent)]).unwrap();
            assert_eq!(built.transaction.total_output() + built.fee, 100_000);
            assert_eq!(built.fee, built.transaction.fee(&built.prevouts).unwrap());
        }
    }

    #[test]
    fn test_builder_with_change() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let dest = KeyPair::generate(Network::Testnet).address();
        let input = utxo(7, 1, 100_000, &owner);

        let built = TransactionBuilder::new()
            .add_input(&input)
            .add_output(&dest, 1_000)
            .change(&owner)
            .build()
            .unwrap();

        assert_eq!(built.fee, 0);
        assert_eq!(built.transaction.outputs.len(), 2);
        assert_eq!(built.transaction.outputs[1].value, 99_000);
        assert_eq!(built.transaction.outputs[1].script_pubkey, owner.script_pubkey());
    }

    #[test]
    fn test_builder_dust_change_goes_to_fee() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let dest = KeyPair::generate(Network::Testnet).address();
        let input = utxo(7, 1, 10_000, &owner);

        let built = TransactionBuilder::new()
            .add_input(&input)
            .add_output(&dest, 9_000)
            .fee(600)
            .change(&owner)
            .build()
            .unwrap();

        assert_eq!(built.transaction.outputs.len(), 1);
        assert_eq!(built.fee, 1_000);
    }

    #[test]
    fn test_builder_fee_exceeding_funds() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let input = utxo(7, 1, 10_000, &owner);

        let result = TransactionBuilder::new()
            .add_input(&input)
            .add_output(&owner, 9_900)
            .fee(200)
            .change(&owner)
            .build();
        assert_eq!(
            result,
            Err(TransactionError::InsufficientFunds {
                available: 10_000,
                required: 10_100
            })
        );
    }

    #[test]
    fn test_fee_prevout_mismatch() {
        let owner = KeyPair::generate(Network::Testnet).address();
        let input = utxo(1, 0, 5_000, &owner);
        let built = new_transaction(&[input], &[Payment::to_address(owner, 1)]).unwrap();
        assert!(matches!(
            built.transaction.fee(&[]),
            Err(TransactionError::PrevoutMismatch { expected: 1, got: 0 })
        ));
    }
}
