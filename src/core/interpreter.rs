//! Script verification
//!
//! A small stack machine covering what P2PKH, bare multisig and P2SH spends
//! need. Unknown opcodes fail verification rather than being skipped.

use super::script::{
    opcodes::*, Instruction, Script, ScriptError, MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE,
};
use super::sighash::compute_signature_hash;
use super::transaction::Transaction;
use crate::crypto::{double_sha256, hash160, sha256, PublicKey};
use crate::signer::Signature;

/// Maximum keys a single CHECKMULTISIG may reference (consensus)
pub const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

type Stack = Vec<Vec<u8>>;

/// Verify that input `input_index` of `tx` satisfies `script_pubkey`
///
/// Runs the unlocking script, then the locking script on the resulting stack.
/// When the locking script is P2SH, the last element pushed by the unlocking
/// script is run as the redeem script against the remaining elements.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
) -> Result<(), ScriptError> {
    let input = tx.inputs.get(input_index).ok_or_else(|| {
        ScriptError::ExecutionFailed(format!(
            "input index {} out of range ({} inputs)",
            input_index,
            tx.inputs.len()
        ))
    })?;
    let checker = SignatureChecker { tx, input_index };

    let is_p2sh = script_pubkey.is_p2sh();
    if is_p2sh && !input.script_sig.is_push_only() {
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack = Stack::new();
    eval(&input.script_sig, &mut stack, &checker)?;
    let mut p2sh_stack = stack.clone();

    eval(script_pubkey, &mut stack, &checker)?;
    if !stack.last().map(|top| cast_to_bool(top)).unwrap_or(false) {
        return Err(ScriptError::EvalFalse);
    }

    if is_p2sh {
        let redeem = Script::from_bytes(p2sh_stack.pop().ok_or(ScriptError::EvalFalse)?);
        eval(&redeem, &mut p2sh_stack, &checker)?;
        if !p2sh_stack.last().map(|top| cast_to_bool(top)).unwrap_or(false) {
            return Err(ScriptError::EvalFalse);
        }
    }

    Ok(())
}

struct SignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
}

impl SignatureChecker<'_> {
    /// Encoding problems count as a failed check, not an error
    fn check(&self, sig_bytes: &[u8], pubkey_bytes: &[u8], script_code: &Script) -> bool {
        let Ok(signature) = Signature::from_bytes(sig_bytes) else {
            return false;
        };
        let Ok(public_key) = PublicKey::from_slice(pubkey_bytes) else {
            return false;
        };
        match compute_signature_hash(self.tx, self.input_index, script_code, signature.hash_type)
        {
            Ok(sighash) => signature.verify(&sighash, &public_key),
            Err(_) => false,
        }
    }
}

fn eval(script: &Script, stack: &mut Stack, checker: &SignatureChecker) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptTooLarge(script.len()));
    }

    for ins in script.instructions() {
        let op = match ins? {
            Instruction::Push(data) => {
                if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushTooLarge(data.len()));
                }
                stack.push(data.to_vec());
                continue;
            }
            Instruction::Op(op) => op,
        };

        match op {
            OP_1NEGATE => stack.push(vec![0x81]),
            OP_1..=OP_16 => stack.push(vec![op - OP_1 + 1]),
            OP_NOP | OP_CODESEPARATOR => {}
            OP_VERIFY => {
                if !cast_to_bool(&pop(stack, op)?) {
                    return Err(ScriptError::VerifyFailed("OP_VERIFY"));
                }
            }
            OP_RETURN => return Err(ScriptError::ExecutionFailed("OP_RETURN".to_string())),
            OP_DROP => {
                pop(stack, op)?;
            }
            OP_DUP => {
                let top = stack.last().ok_or(ScriptError::StackUnderflow(op))?.clone();
                stack.push(top);
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let a = pop(stack, op)?;
                let b = pop(stack, op)?;
                let equal = a == b;
                if op == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed("OP_EQUALVERIFY"));
                    }
                } else {
                    stack.push(bool_element(equal));
                }
            }
            OP_SHA256 => {
                let top = pop(stack, op)?;
                stack.push(sha256(&top).to_vec());
            }
            OP_HASH160 => {
                let top = pop(stack, op)?;
                stack.push(hash160(&top).to_vec());
            }
            OP_HASH256 => {
                let top = pop(stack, op)?;
                stack.push(double_sha256(&top).to_vec());
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = pop(stack, op)?;
                let sig = pop(stack, op)?;
                let ok = checker.check(&sig, &pubkey, script);
                if op == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::VerifyFailed("OP_CHECKSIGVERIFY"));
                    }
                } else {
                    stack.push(bool_element(ok));
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let ok = check_multisig(stack, op, script, checker)?;
                if op == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::VerifyFailed("OP_CHECKMULTISIGVERIFY"));
                    }
                } else {
                    stack.push(bool_element(ok));
                }
            }
            other => return Err(ScriptError::UnsupportedOpcode(other)),
        }
    }

    Ok(())
}

/// Stack layout: `<dummy> <sig_1..sig_m> m <key_1..key_n> n`
///
/// Signatures must appear in the same relative order as their keys.
fn check_multisig(
    stack: &mut Stack,
    op: u8,
    script: &Script,
    checker: &SignatureChecker,
) -> Result<bool, ScriptError> {
    let n = pop_number(stack, op)?;
    if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&n) {
        return Err(ScriptError::ExecutionFailed(format!(
            "key count {} out of range",
            n
        )));
    }
    let keys = split_top(stack, n as usize, op)?;

    let m = pop_number(stack, op)?;
    if m < 0 || m > n {
        return Err(ScriptError::ExecutionFailed(format!(
            "signature count {} out of range for {} keys",
            m, n
        )));
    }
    let sigs = split_top(stack, m as usize, op)?;

    if !pop(stack, op)?.is_empty() {
        return Err(ScriptError::NullDummy);
    }

    // Walk from the last signature and last key, like consensus does
    let mut key_iter = keys.iter().rev();
    let mut keys_left = keys.len();
    for (sigs_left, sig) in (1..=sigs.len()).rev().zip(sigs.iter().rev()) {
        loop {
            if keys_left < sigs_left {
                return Ok(false);
            }
            let Some(key) = key_iter.next() else {
                return Ok(false);
            };
            keys_left -= 1;
            if checker.check(sig, key, script) {
                break;
            }
        }
    }
    Ok(true)
}

fn pop(stack: &mut Stack, op: u8) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow(op))
}

/// Remove the top `count` elements, keeping their push order
fn split_top(stack: &mut Stack, count: usize, op: u8) -> Result<Stack, ScriptError> {
    if stack.len() < count {
        return Err(ScriptError::StackUnderflow(op));
    }
    let at = stack.len() - count;
    Ok(stack.split_off(at))
}

fn pop_number(stack: &mut Stack, op: u8) -> Result<i64, ScriptError> {
    decode_number(&pop(stack, op)?)
}

/// Little-endian sign-magnitude script number, at most 4 bytes
fn decode_number(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.len() > 4 {
        return Err(ScriptError::InvalidNumber);
    }
    let Some((&last, _)) = bytes.split_last() else {
        return Ok(0);
    };
    let mut value = bytes
        .iter()
        .enumerate()
        .fold(0i64, |acc, (i, b)| acc | ((*b as i64) << (8 * i)));
    if last & 0x80 != 0 {
        value &= !(0x80i64 << (8 * (bytes.len() - 1)));
        value = -value;
    }
    Ok(value)
}

fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, b) in bytes.iter().enumerate() {
        if *b != 0 {
            // Negative zero is false
            return !(i == bytes.len() - 1 && *b == 0x80);
        }
    }
    false
}

fn bool_element(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}
