//! Multi-signature wallet implementation
//!
//! Provides threshold-based wallets requiring M-of-N signatures, spendable
//! through a P2SH output that commits to the multisig redeem script.

use serde::{Deserialize, Serialize};

use crate::core::{
    build_multisig_redeem_script, script_hash_locking_script, Address, Network, Script,
    ScriptError,
};
use crate::crypto::PublicKey;

/// Configuration for a multisig wallet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultisigConfig {
    /// Minimum signatures required (M in M-of-N)
    pub threshold: usize,
    /// Public keys of all authorized signers, in redeem-script order
    pub signers: Vec<PublicKey>,
    /// Optional human-readable label
    pub label: Option<String>,
}

impl MultisigConfig {
    /// Create a new multisig configuration
    ///
    /// # Arguments
    /// * `threshold` - Minimum signatures required (M)
    /// * `signers` - Public keys of authorized signers (N), order is kept
    /// * `label` - Optional label
    ///
    /// # Errors
    /// Returns error if the threshold or signer list cannot form a standard
    /// multisig script
    pub fn new(
        threshold: usize,
        signers: Vec<PublicKey>,
        label: Option<String>,
    ) -> Result<Self, ScriptError> {
        // Validation is the same as for the script itself
        build_multisig_redeem_script(&signers, threshold)?;
        Ok(Self {
            threshold,
            signers,
            label,
        })
    }

    /// Same configuration with signers in lexicographic key order
    ///
    /// Sorting makes the address independent of the order keys were
    /// collected in, as long as every party sorts.
    pub fn sorted(mut self) -> Self {
        self.signers.sort();
        self
    }

    /// Get the threshold (M)
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Get the total signer count (N)
    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// Check if a public key is an authorized signer
    pub fn is_signer(&self, pubkey: &PublicKey) -> bool {
        self.signers.contains(pubkey)
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.signers.len())
    }
}

/// A multi-signature wallet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultisigWallet {
    /// Wallet configuration
    pub config: MultisigConfig,
    /// Network the address is encoded for
    pub network: Network,
    redeem_script: Script,
}

impl MultisigWallet {
    /// Create a new multisig wallet
    pub fn new(config: MultisigConfig, network: Network) -> Result<Self, ScriptError> {
        let redeem_script = build_multisig_redeem_script(&config.signers, config.threshold)?;
        Ok(Self {
            config,
            network,
            redeem_script,
        })
    }

    /// `OP_M <keys> OP_N OP_CHECKMULTISIG`, revealed when spending
    pub fn redeem_script(&self) -> &Script {
        &self.redeem_script
    }

    /// P2SH locking script funds are sent to
    pub fn locking_script(&self) -> Script {
        script_hash_locking_script(&self.redeem_script)
    }

    /// P2SH address
    pub fn address(&self) -> Address {
        Address::p2sh(&self.redeem_script, self.network)
    }

    /// Get the configuration
    pub fn config(&self) -> &MultisigConfig {
        &self.config
    }

    /// Check if a public key is an authorized signer
    pub fn is_signer(&self, pubkey: &PublicKey) -> bool {
        self.config.is_signer(pubkey)
    }

    /// Get the required threshold
    pub fn threshold(&self) -> usize {
        self.config.threshold
    }

    /// Get the total number of signers
    pub fn signer_count(&self) -> usize {
        self.config.signer_count()
    }

    /// Get human-readable description
    pub fn description(&self) -> String {
        self.config.description()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{address_from_script, parse_multisig};
    use crate::crypto::KeyPair;

    fn sample_pubkeys(n: usize) -> Vec<PublicKey> {
        (0..n)
            .map(|_| *KeyPair::generate(Network::Testnet).public_key())
            .collect()
    }

    #[test]
    fn test_config_creation() {
        let config =
            MultisigConfig::new(2, sample_pubkeys(3), Some("Test".to_string())).unwrap();

        assert_eq!(config.threshold(), 2);
        assert_eq!(config.signer_count(), 3);
        assert_eq!(config.description(), "2-of-3");
        assert!(config.label.is_some());
    }

    #[test]
    fn test_config_validation() {
        let keys = sample_pubkeys(3);

        // Zero threshold
        assert!(MultisigConfig::new(0, keys.clone(), None).is_err());

        // Threshold > signers
        assert!(MultisigConfig::new(4, keys.clone(), None).is_err());

        // Duplicate signers
        assert!(matches!(
            MultisigConfig::new(1, vec![keys[0], keys[0]], None),
            Err(ScriptError::DuplicateKey(_))
        ));

        // A single signer is a valid 1-of-1
        assert!(MultisigConfig::new(1, vec![keys[0]], None).is_ok());
    }

    #[test]
    fn test_wallet_creation() {
        let config = MultisigConfig::new(2, sample_pubkeys(3), None).unwrap();
        let wallet = MultisigWallet::new(config, Network::Testnet).unwrap();

        // Testnet P2SH addresses start with '2'
        assert!(wallet.address().to_string().starts_with('2'));
        assert_eq!(wallet.threshold(), 2);
        assert_eq!(wallet.signer_count(), 3);
        assert_eq!(
            address_from_script(&wallet.locking_script(), Network::Testnet).unwrap(),
            wallet.address()
        );
    }

    #[test]
    fn test_address_determinism() {
        let pubkeys = sample_pubkeys(3);

        let config1 = MultisigConfig::new(2, pubkeys.clone(), None).unwrap();
        let config2 = MultisigConfig::new(2, pubkeys, None).unwrap();

        let wallet1 = MultisigWallet::new(config1, Network::Testnet).unwrap();
        let wallet2 = MultisigWallet::new(config2, Network::Testnet).unwrap();

        // Same config should produce same address
        assert_eq!(wallet1.address(), wallet2.address());
    }

    #[test]
    fn test_sorted_config_ignores_collection_order() {
        let pubkeys = sample_pubkeys(3);
        let mut shuffled = pubkeys.clone();
        shuffled.rotate_left(1);

        let a = MultisigConfig::new(2, pubkeys, None).unwrap().sorted();
        let b = MultisigConfig::new(2, shuffled, None).unwrap().sorted();
        let wa = MultisigWallet::new(a, Network::Testnet).unwrap();
        let wb = MultisigWallet::new(b, Network::Testnet).unwrap();
        assert_eq!(wa.address(), wb.address());

        let (_, keys) = parse_multisig(wa.redeem_script()).unwrap();
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_is_signer() {
        let pubkeys = sample_pubkeys(3);
        let config = MultisigConfig::new(2, pubkeys.clone(), None).unwrap();
        let wallet = MultisigWallet::new(config, Network::Testnet).unwrap();

        assert!(wallet.is_signer(&pubkeys[0]));
        assert!(wallet.is_signer(&pubkeys[1]));
        let outsider = KeyPair::generate(Network::Testnet);
        assert!(!wallet.is_signer(outsider.public_key()));
    }
}
