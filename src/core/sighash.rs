//! Legacy signature hashes
//!
//! The digest a signature commits to is computed from a modified copy of the
//! transaction: every unlocking script is blanked, the input being signed gets
//! the script code in its place, and outputs / other inputs are pruned
//! according to the hash type. The 4-byte hash type is appended before double
//! SHA-256.
//!
//! For a P2SH input the script code is the redeem script, not the P2SH
//! locking script.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::encode::encode_transaction;
use super::script::Script;
use super::transaction::{Transaction, TransactionError, TxOut};
use crate::crypto::double_sha256;

// =============================================================================
// Signature Hash Types
// =============================================================================

/// Signature hash type determines what parts of the transaction are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SigHashType {
    /// Sign all inputs and all outputs (default)
    #[default]
    All = 0x01,
    /// Sign all inputs but no outputs
    None = 0x02,
    /// Sign all inputs and only the output with same index
    Single = 0x03,
    /// SIGHASH_ALL | SIGHASH_ANYONECANPAY
    AllAnyoneCanPay = 0x81,
    /// SIGHASH_NONE | SIGHASH_ANYONECANPAY
    NoneAnyoneCanPay = 0x82,
    /// SIGHASH_SINGLE | SIGHASH_ANYONECANPAY
    SingleAnyoneCanPay = 0x83,
}

impl SigHashType {
    /// Parse sighash type from byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SigHashType::All),
            0x02 => Some(SigHashType::None),
            0x03 => Some(SigHashType::Single),
            0x81 => Some(SigHashType::AllAnyoneCanPay),
            0x82 => Some(SigHashType::NoneAnyoneCanPay),
            0x83 => Some(SigHashType::SingleAnyoneCanPay),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this sighash includes ANYONECANPAY flag
    pub fn is_anyone_can_pay(&self) -> bool {
        (*self as u8) & 0x80 != 0
    }

    /// Get the base type (without ANYONECANPAY flag)
    pub fn base_type(&self) -> SigHashType {
        match (*self as u8) & 0x1f {
            0x02 => SigHashType::None,
            0x03 => SigHashType::Single,
            _ => SigHashType::All,
        }
    }
}

// =============================================================================
// Signature Hash
// =============================================================================

/// The 32-byte digest a signature commits to
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureHash([u8; 32]);

impl SignatureHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Returned for SIGHASH_SINGLE when the input has no matching output
const SIGHASH_SINGLE_BUG: [u8; 32] = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

/// Compute the legacy signature hash of `input_index`
///
/// The result depends only on outpoints, sequences, outputs, version, lock
/// time, `script_code` and `hash_type`. Unlocking scripts already attached to
/// any input are blanked first, so adding signatures never changes it.
pub fn compute_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    hash_type: SigHashType,
) -> Result<SignatureHash, TransactionError> {
    if input_index >= tx.inputs.len() {
        return Err(TransactionError::InputIndexOutOfRange {
            index: input_index,
            inputs: tx.inputs.len(),
        });
    }

    let base = hash_type.base_type();
    if base == SigHashType::Single && input_index >= tx.outputs.len() {
        return Ok(SignatureHash(SIGHASH_SINGLE_BUG));
    }

    let mut copy = tx.clone();
    let script_code = script_code.without_code_separators();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
        if i == input_index {
            input.script_sig = script_code.clone();
        } else {
            input.script_sig = Script::new();
            if base != SigHashType::All {
                input.sequence = 0;
            }
        }
    }

    match base {
        SigHashType::None => copy.outputs.clear(),
        SigHashType::Single => {
            copy.outputs.truncate(input_index + 1);
            for output in copy.outputs.iter_mut().take(input_index) {
                *output = TxOut {
                    value: u64::MAX,
                    script_pubkey: Script::new(),
                };
            }
        }
        _ => {}
    }

    if hash_type.is_anyone_can_pay() {
        let own = copy.inputs.swap_remove(input_index);
        copy.inputs = vec![own];
    }

    let mut buf = BytesMut::new();
    encode_transaction(&copy, &mut buf);
    buf.put_u32_le(hash_type.to_byte() as u32);
    Ok(SignatureHash(double_sha256(&buf)))
}
