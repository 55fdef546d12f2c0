//! Transaction signatures as they appear in unlocking scripts
//!
//! DER-encoded ECDSA signature followed by one hash-type byte.

use std::fmt;

use secp256k1::ecdsa;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::{SigHashType, SignatureHash};
use crate::crypto::{KeyError, PublicKey};

/// An ECDSA signature plus the hash type it was made with
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub signature: ecdsa::Signature,
    pub hash_type: SigHashType,
}

impl Signature {
    /// Encoding used inside unlocking scripts
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.signature.serialize_der().to_vec();
        bytes.push(self.hash_type.to_byte());
        bytes
    }

    /// Parse `DER || hash_type`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let (&hash_byte, der) = bytes.split_last().ok_or(KeyError::InvalidSignature)?;
        let hash_type = SigHashType::from_byte(hash_byte).ok_or(KeyError::InvalidSignature)?;
        let signature = ecdsa::Signature::from_der(der).map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self {
            signature,
            hash_type,
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Check this signature against a signature hash and key
    pub fn verify(&self, sighash: &SignatureHash, public_key: &PublicKey) -> bool {
        public_key.verify_digest(sighash.as_bytes(), &self.signature)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Signature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
