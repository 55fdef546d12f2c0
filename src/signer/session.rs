//! Signing sessions
//!
//! A [`SigningSession`] carries an unsigned transaction through signing. Each
//! input knows the output it spends and how that output is unlocked, so keys
//! can be applied in any order, by any party, and the session can be
//! serialized and handed on between signers.

use serde::{Deserialize, Serialize};

use super::sign::{p2pkh_unlocking_script, sign_input, SignerError};
use super::signature::Signature;
use crate::core::{
    compute_signature_hash, verify_input, BuiltTransaction, Script, SigHashType, SignatureHash,
    Transaction, TransactionError, UnspentOutput,
};
use crate::crypto::{hash160, KeyPair, PublicKey};
use crate::multisig::PartialMultisigInput;

/// How far signing has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningStatus {
    /// No input carries a signature yet
    Unsigned,
    /// Some signatures are present but at least one input is incomplete
    PartiallySigned,
    /// Every input has a complete unlocking script
    FullySigned,
}

/// Signature state for one input, by the kind of output it spends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSigner {
    P2pkh {
        signer: Option<PublicKey>,
        signature: Option<Signature>,
    },
    Multisig(PartialMultisigInput),
}

impl InputSigner {
    fn is_complete(&self) -> bool {
        match self {
            InputSigner::P2pkh { signature, .. } => signature.is_some(),
            InputSigner::Multisig(partial) => partial.is_ready(),
        }
    }

    fn has_signatures(&self) -> bool {
        match self {
            InputSigner::P2pkh { signature, .. } => signature.is_some(),
            InputSigner::Multisig(partial) => partial.signature_count() > 0,
        }
    }
}

/// An unsigned or partially signed transaction with everything needed to
/// finish it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSession {
    transaction: Transaction,
    prevouts: Vec<UnspentOutput>,
    inputs: Vec<InputSigner>,
    hash_type: SigHashType,
    fee: u64,
}

impl SigningSession {
    /// Start a session for `built`
    ///
    /// P2PKH inputs need nothing more. Every P2SH input must be matched by
    /// one of `redeem_scripts` (by script hash) and that redeem script must
    /// be a standard multisig script.
    pub fn new(built: BuiltTransaction, redeem_scripts: &[Script]) -> Result<Self, SignerError> {
        let BuiltTransaction {
            transaction,
            prevouts,
            fee,
        } = built;

        let mut inputs = Vec::with_capacity(prevouts.len());
        for (index, prevout) in prevouts.iter().enumerate() {
            let spk = &prevout.script_pubkey;
            if spk.is_p2pkh() {
                inputs.push(InputSigner::P2pkh {
                    signer: None,
                    signature: None,
                });
            } else if let Some(script_hash) = spk.p2sh_hash() {
                let redeem = redeem_scripts
                    .iter()
                    .find(|r| hash160(r.as_bytes()) == script_hash)
                    .ok_or_else(|| SignerError::UnsupportedInput {
                        input: index,
                        script: spk.to_asm(),
                    })?;
                inputs.push(InputSigner::Multisig(PartialMultisigInput::new(
                    index,
                    redeem.clone(),
                )?));
            } else {
                return Err(SignerError::UnsupportedInput {
                    input: index,
                    script: spk.to_asm(),
                });
            }
        }

        Ok(Self {
            transaction,
            prevouts,
            inputs,
            hash_type: SigHashType::All,
            fee,
        })
    }

    /// Use `hash_type` for signatures made from now on
    pub fn with_hash_type(mut self, hash_type: SigHashType) -> Self {
        self.hash_type = hash_type;
        self
    }

    /// The transaction, with unlocking scripts for every completed input
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn prevouts(&self) -> &[UnspentOutput] {
        &self.prevouts
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn input(&self, index: usize) -> Option<&InputSigner> {
        self.inputs.get(index)
    }

    /// Script code signed for `index`: the locking script for P2PKH, the
    /// redeem script for P2SH
    fn script_code(&self, index: usize) -> Result<&Script, SignerError> {
        match self.inputs.get(index) {
            Some(InputSigner::P2pkh { .. }) => Ok(&self.prevouts[index].script_pubkey),
            Some(InputSigner::Multisig(partial)) => Ok(&partial.redeem_script),
            None => Err(TransactionError::InputIndexOutOfRange {
                index,
                inputs: self.inputs.len(),
            }
            .into()),
        }
    }

    /// Digest every signer of input `index` signs
    ///
    /// Blanking all unlocking scripts is part of the digest, so the value is
    /// the same before and after any signatures are attached.
    pub fn signature_hash(&self, index: usize) -> Result<SignatureHash, SignerError> {
        let script_code = self.script_code(index)?;
        Ok(compute_signature_hash(
            &self.transaction,
            index,
            script_code,
            self.hash_type,
        )?)
    }

    /// Sign every input `key` can unlock and has not signed yet
    ///
    /// Returns how many inputs were signed.
    pub fn sign(&mut self, key: &KeyPair) -> Result<usize, SignerError> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            if self.can_sign(index, key.public_key()) {
                self.sign_input(index, key)?;
                signed += 1;
            }
        }
        Ok(signed)
    }

    fn can_sign(&self, index: usize, public_key: &PublicKey) -> bool {
        match &self.inputs[index] {
            InputSigner::P2pkh { signature, .. } => {
                signature.is_none()
                    && self.prevouts[index].script_pubkey.p2pkh_hash()
                        == Some(public_key.pubkey_hash())
            }
            InputSigner::Multisig(partial) => {
                partial.signers.contains(public_key) && !partial.is_signed_by(public_key)
            }
        }
    }

    /// Sign input `index` with `key`
    pub fn sign_input(&mut self, index: usize, key: &KeyPair) -> Result<(), SignerError> {
        let public_key = *key.public_key();
        if let Some(InputSigner::P2pkh { .. }) = self.inputs.get(index) {
            if self.prevouts[index].script_pubkey.p2pkh_hash() != Some(public_key.pubkey_hash()) {
                return Err(SignerError::KeyMismatch {
                    input: index,
                    signer: public_key,
                });
            }
        }

        let script_code = self.script_code(index)?;
        let signature = sign_input(
            &self.transaction,
            index,
            key.private_key(),
            script_code,
            self.hash_type,
        )?;
        self.add_signature(index, public_key, signature)
    }

    /// Attach a signature made elsewhere
    ///
    /// The signature must verify against [`Self::signature_hash`] for the
    /// signer's key.
    pub fn add_signature(
        &mut self,
        index: usize,
        public_key: PublicKey,
        signature: Signature,
    ) -> Result<(), SignerError> {
        let sighash = {
            let script_code = self.script_code(index)?;
            compute_signature_hash(&self.transaction, index, script_code, signature.hash_type)?
        };

        match &mut self.inputs[index] {
            InputSigner::P2pkh {
                signer,
                signature: slot,
            } => {
                if self.prevouts[index].script_pubkey.p2pkh_hash()
                    != Some(public_key.pubkey_hash())
                {
                    return Err(SignerError::KeyMismatch {
                        input: index,
                        signer: public_key,
                    });
                }
                if slot.is_some() {
                    return Err(SignerError::AlreadySigned(public_key));
                }
                if !signature.verify(&sighash, &public_key) {
                    return Err(SignerError::InvalidSignature {
                        input: index,
                        signer: public_key,
                    });
                }
                *signer = Some(public_key);
                *slot = Some(signature);
                self.transaction.inputs[index].script_sig =
                    p2pkh_unlocking_script(&signature, &public_key);
            }
            InputSigner::Multisig(partial) => {
                partial.add_signature(public_key, signature, &sighash)?;
                if partial.is_ready() {
                    self.transaction.inputs[index].script_sig = partial.unlocking_script()?;
                }
            }
        }

        log::debug!("Input {} signed by {}", index, public_key);
        Ok(())
    }

    pub fn is_input_complete(&self, index: usize) -> bool {
        self.inputs
            .get(index)
            .map(InputSigner::is_complete)
            .unwrap_or(false)
    }

    pub fn status(&self) -> SigningStatus {
        if self.inputs.iter().all(InputSigner::is_complete) {
            SigningStatus::FullySigned
        } else if self.inputs.iter().any(InputSigner::has_signatures) {
            SigningStatus::PartiallySigned
        } else {
            SigningStatus::Unsigned
        }
    }

    /// Run every input through the script interpreter
    pub fn verify(&self) -> Result<(), SignerError> {
        for (index, prevout) in self.prevouts.iter().enumerate() {
            verify_input(&self.transaction, index, &prevout.script_pubkey)?;
        }
        Ok(())
    }

    /// The fully signed transaction
    pub fn finalize(self) -> Result<Transaction, SignerError> {
        if let Some(index) = self.inputs.iter().position(|i| !i.is_complete()) {
            return Err(SignerError::IncompleteInput(index));
        }
        self.verify()?;
        Ok(self.transaction)
    }
}
