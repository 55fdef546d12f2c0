//! Signing and unlocking-script assembly

use thiserror::Error;

use super::signature::Signature;
use crate::core::{
    compute_signature_hash, opcodes::OP_0, parse_multisig, Script, ScriptBuilder, ScriptError,
    SigHashType, Transaction, TransactionError,
};
use crate::crypto::{KeyError, PrivateKey, PublicKey};

/// Signing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },
    #[error("Key {0} is not part of the redeem script")]
    UnknownSigner(PublicKey),
    #[error("Already signed by {0}")]
    AlreadySigned(PublicKey),
    #[error("Signature from {signer} does not verify for input {input}")]
    InvalidSignature { input: usize, signer: PublicKey },
    #[error("Key {signer} cannot sign input {input}")]
    KeyMismatch { input: usize, signer: PublicKey },
    #[error("Input {input} spends an unsupported script: {script}")]
    UnsupportedInput { input: usize, script: String },
    #[error("Input {0} is not fully signed")]
    IncompleteInput(usize),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// Sign input `input_index` of `tx`
///
/// `script_code` is the locking script for a P2PKH input and the redeem
/// script for a P2SH input. Signing is deterministic: the same transaction,
/// index, key, script and hash type always give the same signature.
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    private_key: &PrivateKey,
    script_code: &Script,
    hash_type: SigHashType,
) -> Result<Signature, SignerError> {
    let sighash = compute_signature_hash(tx, input_index, script_code, hash_type)?;
    let signature = private_key.sign_digest(sighash.as_bytes())?;
    Ok(Signature {
        signature,
        hash_type,
    })
}

/// `<sig> <pubkey>`
pub fn p2pkh_unlocking_script(signature: &Signature, public_key: &PublicKey) -> Script {
    ScriptBuilder::new()
        .push_slice(&signature.to_bytes())
        .push_key(public_key)
        .into_script()
}

/// `OP_0 <sig_1> .. <sig_m> <redeem_script>`
///
/// Signatures are placed in the order of their keys in the redeem script,
/// which is what CHECKMULTISIG requires. Only the first `m` (by key order)
/// are used when more are supplied.
pub fn assemble_multisig_unlocking_script(
    signatures: &[(PublicKey, Signature)],
    redeem_script: &Script,
) -> Result<Script, SignerError> {
    let (threshold, keys) = parse_multisig(redeem_script)?;

    let mut indexed: Vec<(usize, &Signature)> = Vec::with_capacity(signatures.len());
    for (key, signature) in signatures {
        let position = keys
            .iter()
            .position(|k| k == key)
            .ok_or(SignerError::UnknownSigner(*key))?;
        if indexed.iter().any(|(p, _)| *p == position) {
            return Err(SignerError::AlreadySigned(*key));
        }
        indexed.push((position, signature));
    }

    if indexed.len() < threshold {
        return Err(SignerError::InsufficientSignatures {
            have: indexed.len(),
            need: threshold,
        });
    }

    indexed.sort_by_key(|(position, _)| *position);
    let builder = indexed
        .iter()
        .take(threshold)
        .fold(ScriptBuilder::new().push_opcode(OP_0), |b, (_, sig)| {
            b.push_slice(&sig.to_bytes())
        });

    Ok(builder.push_slice(redeem_script.as_bytes()).into_script())
}
