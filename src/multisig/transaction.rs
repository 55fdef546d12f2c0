//! Partially signed multisig inputs
//!
//! Collects signatures for one P2SH multisig input from any number of
//! independent signers until the threshold is met.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{parse_multisig, Script, SignatureHash};
use crate::crypto::PublicKey;
use crate::signer::{assemble_multisig_unlocking_script, Signature, SignerError};

/// A single signature from a multisig participant
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultisigSignature {
    /// Public key of the signer
    pub signer: PublicKey,
    /// Signature over the input's signature hash
    pub signature: Signature,
    /// When the signature was added
    pub signed_at: DateTime<Utc>,
}

/// Status of a partially signed input
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PendingStatus {
    /// Waiting for more signatures
    AwaitingSignatures,
    /// Has enough signatures to build the unlocking script
    Ready,
}

/// Signature collection state for one multisig input
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartialMultisigInput {
    /// Index of the input within its transaction
    pub input_index: usize,
    /// Redeem script the P2SH output commits to
    pub redeem_script: Script,
    /// Required signature threshold
    pub threshold: usize,
    /// Keys in redeem-script order
    pub signers: Vec<PublicKey>,
    /// Collected signatures, in the order they arrived
    pub signatures: Vec<MultisigSignature>,
    /// Current status
    pub status: PendingStatus,
}

impl PartialMultisigInput {
    /// Start collecting for `redeem_script`
    pub fn new(input_index: usize, redeem_script: Script) -> Result<Self, SignerError> {
        let (threshold, signers) = parse_multisig(&redeem_script)?;
        Ok(Self {
            input_index,
            redeem_script,
            threshold,
            signers,
            signatures: Vec::new(),
            status: PendingStatus::AwaitingSignatures,
        })
    }

    /// Add a signature from an authorized signer
    ///
    /// The signature is checked against `sighash` before it is kept. The
    /// caller passes the same hash for every signer; attaching signatures does
    /// not change it.
    pub fn add_signature(
        &mut self,
        signer: PublicKey,
        signature: Signature,
        sighash: &SignatureHash,
    ) -> Result<(), SignerError> {
        // Check signer is authorized
        if !self.signers.contains(&signer) {
            return Err(SignerError::UnknownSigner(signer));
        }

        // Check not already signed by this signer
        if self.is_signed_by(&signer) {
            return Err(SignerError::AlreadySigned(signer));
        }

        // Verify the signature
        if !signature.verify(sighash, &signer) {
            return Err(SignerError::InvalidSignature {
                input: self.input_index,
                signer,
            });
        }

        self.signatures.push(MultisigSignature {
            signer,
            signature,
            signed_at: Utc::now(),
        });

        // Check if we have enough signatures
        if self.signatures.len() >= self.threshold {
            self.status = PendingStatus::Ready;
        }

        Ok(())
    }

    /// Get number of signatures collected
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Check if the input has enough signatures
    pub fn is_ready(&self) -> bool {
        self.status == PendingStatus::Ready
    }

    pub fn is_signed_by(&self, signer: &PublicKey) -> bool {
        self.signatures.iter().any(|s| &s.signer == signer)
    }

    /// Get signers who have already signed
    pub fn signed_by(&self) -> Vec<&PublicKey> {
        self.signatures.iter().map(|s| &s.signer).collect()
    }

    /// Build the unlocking script from the collected signatures
    pub fn unlocking_script(&self) -> Result<Script, SignerError> {
        let pairs: Vec<(PublicKey, Signature)> = self
            .signatures
            .iter()
            .map(|s| (s.signer, s.signature))
            .collect();
        assemble_multisig_unlocking_script(&pairs, &self.redeem_script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        build_multisig_redeem_script, compute_signature_hash, Network, OutPoint, SigHashType,
        Transaction, TxIn, TxOut, Txid,
    };
    use crate::crypto::KeyPair;
    use crate::signer::sign_input;

    fn setup(threshold: usize) -> (Transaction, Script, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate(Network::Testnet)).collect();
        let pubkeys: Vec<PublicKey> = keys.iter().map(|k| *k.public_key()).collect();
        let redeem = build_multisig_redeem_script(&pubkeys, threshold).unwrap();
        let tx = Transaction {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::new(Txid::from_bytes([8u8; 32]), 0))],
            outputs: vec![TxOut {
                value: 50,
                script_pubkey: keys[0].address().script_pubkey(),
            }],
            lock_time: 0,
        };
        (tx, redeem, keys)
    }

    #[test]
    fn test_signature_collection() {
        let (tx, redeem, keys) = setup(2);
        let sighash = compute_signature_hash(&tx, 0, &redeem, SigHashType::All).unwrap();
        let mut pending = PartialMultisigInput::new(0, redeem.clone()).unwrap();
        assert_eq!(pending.threshold, 2);
        assert!(!pending.is_ready());

        // Sign with first key
        let sig1 = sign_input(&tx, 0, keys[0].private_key(), &redeem, SigHashType::All).unwrap();
        pending
            .add_signature(*keys[0].public_key(), sig1, &sighash)
            .unwrap();
        assert_eq!(pending.signature_count(), 1);
        assert!(!pending.is_ready());
        assert!(matches!(
            pending.unlocking_script(),
            Err(SignerError::InsufficientSignatures { have: 1, need: 2 })
        ));

        // Sign with third key
        let sig3 = sign_input(&tx, 0, keys[2].private_key(), &redeem, SigHashType::All).unwrap();
        pending
            .add_signature(*keys[2].public_key(), sig3, &sighash)
            .unwrap();
        assert!(pending.is_ready());
        assert_eq!(pending.status, PendingStatus::Ready);
        assert!(pending.unlocking_script().is_ok());
        assert_eq!(pending.signed_by().len(), 2);
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let (tx, redeem, keys) = setup(2);
        let sighash = compute_signature_hash(&tx, 0, &redeem, SigHashType::All).unwrap();
        let mut pending = PartialMultisigInput::new(0, redeem.clone()).unwrap();

        let sig = sign_input(&tx, 0, keys[0].private_key(), &redeem, SigHashType::All).unwrap();
        pending.add_signature(*keys[0].public_key(), sig, &sighash).unwrap();

        let result = pending.add_signature(*keys[0].public_key(), sig, &sighash);
        assert!(matches!(result, Err(SignerError::AlreadySigned(_))));
    }

    #[test]
    fn test_unauthorized_signer_rejected() {
        let (tx, redeem, _) = setup(2);
        let sighash = compute_signature_hash(&tx, 0, &redeem, SigHashType::All).unwrap();
        let mut pending = PartialMultisigInput::new(0, redeem.clone()).unwrap();
        let outsider = KeyPair::generate(Network::Testnet);

        let sig = sign_input(&tx, 0, outsider.private_key(), &redeem, SigHashType::All).unwrap();
        let result = pending.add_signature(*outsider.public_key(), sig, &sighash);
        assert!(matches!(result, Err(SignerError::UnknownSigner(_))));
    }

    #[test]
    fn test_signature_for_other_hash_rejected() {
        let (tx, redeem, keys) = setup(1);
        let sighash = compute_signature_hash(&tx, 0, &redeem, SigHashType::All).unwrap();
        let mut pending = PartialMultisigInput::new(0, redeem).unwrap();

        // Signed over the wrong script code
        let spk = keys[1].address().script_pubkey();
        let sig = sign_input(&tx, 0, keys[1].private_key(), &spk, SigHashType::All).unwrap();
        let result = pending.add_signature(*keys[1].public_key(), sig, &sighash);
        assert!(matches!(
            result,
            Err(SignerError::InvalidSignature { input: 0, .. })
        ));
        assert_eq!(pending.signature_count(), 0);
    }
}
