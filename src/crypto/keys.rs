//! ECDSA key management
//!
//! Provides private keys tagged with their network, compressed public keys,
//! key pair generation, and deterministic (RFC 6979) signing and verification
//! over 32-byte digests using the secp256k1 curve.

use std::cmp::Ordering;
use std::fmt;

use rand::rngs::OsRng;
use secp256k1::{ecdsa, Message, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::hash::hash160;
use crate::core::{Address, Network};

/// Length of a compressed public key
pub const COMPRESSED_PUBLIC_KEY_SIZE: usize = 33;

/// Errors that can occur during key operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

// =============================================================================
// Private Key
// =============================================================================

/// A secp256k1 private key bound to a network
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: SecretKey,
    network: Network,
}

impl PrivateKey {
    /// Create a private key from a 32-byte big-endian scalar
    ///
    /// Fails with `InvalidKeyFormat` if the scalar is zero or not below the
    /// curve order.
    pub fn from_slice(bytes: &[u8], network: Network) -> Result<Self, KeyError> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidKeyFormat(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(bytes).map_err(|_| {
            KeyError::InvalidKeyFormat("scalar out of range for secp256k1".to_string())
        })?;
        Ok(Self { secret, network })
    }

    /// Create a private key from a hex-encoded scalar
    pub fn from_hex(hex_key: &str, network: Network) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| KeyError::InvalidKeyFormat(format!("bad hex: {}", e)))?;
        Self::from_slice(&bytes, network)
    }

    /// Network this key is intended for
    pub fn network(&self) -> Network {
        self.network
    }

    /// Get the private key as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// Sign a 32-byte digest
    ///
    /// libsecp256k1 uses RFC 6979 nonces and produces low-S signatures, so the
    /// same key and digest always give the same signature.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<ecdsa::Signature, KeyError> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(digest)?;
        Ok(secp.sign_ecdsa(&message, &self.secret))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Public Key
// =============================================================================

/// A compressed secp256k1 public key
///
/// Ordering is lexicographic on the 33-byte compressed encoding, which is what
/// sorted multisig key sets rely on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Parse a public key from its SEC1 encoding (compressed or uncompressed)
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        secp256k1::PublicKey::from_slice(bytes)
            .map(PublicKey)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    /// Parse a public key from hex string
    pub fn from_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_slice(&bytes)
    }

    /// Compressed 33-byte encoding
    pub fn serialize(&self) -> [u8; COMPRESSED_PUBLIC_KEY_SIZE] {
        self.0.serialize()
    }

    /// HASH160 of the compressed encoding
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.serialize())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    /// Verify a signature over a 32-byte digest
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &ecdsa::Signature) -> bool {
        let secp = Secp256k1::verification_only();
        let Ok(message) = Message::from_digest_slice(digest) else {
            return false;
        };
        // Consensus accepts high-S encodings, libsecp256k1 does not
        let mut normalized = *signature;
        normalized.normalize_s();
        secp.verify_ecdsa(&message, &normalized, &self.0).is_ok()
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialize().cmp(&other.serialize())
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Derivation
// =============================================================================

/// Derive the compressed public key for a private key
pub fn derive_public_key(private_key: &PrivateKey) -> PublicKey {
    let secp = Secp256k1::signing_only();
    PublicKey(secp256k1::PublicKey::from_secret_key(
        &secp,
        &private_key.secret,
    ))
}

/// Derive the pay-to-pubkey-hash address of a public key
pub fn derive_address(public_key: &PublicKey, network: Network) -> Address {
    Address::p2pkh(public_key, network)
}

// =============================================================================
// Key Pair
// =============================================================================

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone, Debug)]
pub struct KeyPair {
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(network: Network) -> Self {
        let secp = Secp256k1::new();
        let (secret, _) = secp.generate_keypair(&mut OsRng);
        Self::from_private_key(PrivateKey { secret, network })
    }

    /// Create a key pair from an existing private key
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = derive_public_key(&private_key);
        Self {
            private_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str, network: Network) -> Result<Self, KeyError> {
        Ok(Self::from_private_key(PrivateKey::from_hex(
            hex_key, network,
        )?))
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn network(&self) -> Network {
        self.private_key.network
    }

    /// P2PKH address on the key's own network
    pub fn address(&self) -> Address {
        derive_address(&self.public_key, self.network())
    }
}
