//! Network addresses
//!
//! An address is a pure function of (hash, network, kind). Its text form is
//! Base58Check(version || hash) with the version byte picked by network and
//! kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::script::{Script, ScriptError};
use crate::crypto::{double_sha256, hash160, PublicKey};

/// Address-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58 encoding")]
    InvalidBase58,
    #[error("Invalid address length: {0}")]
    InvalidLength(usize),
    #[error("Checksum mismatch")]
    BadChecksum,
    #[error("Unknown address version byte: {0:#04x}")]
    UnknownVersion(u8),
}

// =============================================================================
// Network
// =============================================================================

/// Ledger network, selects address version bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
}

impl Network {
    /// Version byte of pay-to-pubkey-hash addresses
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    /// Version byte of pay-to-script-hash addresses
    pub fn p2sh_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet => 0xc4,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "livenet" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

// =============================================================================
// Address
// =============================================================================

/// What the address hash commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    /// HASH160 of a compressed public key
    PubkeyHash,
    /// HASH160 of a redeem script
    ScriptHash,
}

/// A P2PKH or P2SH address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub network: Network,
    pub kind: AddressKind,
    pub hash: [u8; 20],
}

impl Address {
    /// Pay-to-pubkey-hash address of a public key
    pub fn p2pkh(public_key: &PublicKey, network: Network) -> Self {
        Self {
            network,
            kind: AddressKind::PubkeyHash,
            hash: public_key.pubkey_hash(),
        }
    }

    /// Pay-to-script-hash address committing to a redeem script
    pub fn p2sh(redeem_script: &Script, network: Network) -> Self {
        Self {
            network,
            kind: AddressKind::ScriptHash,
            hash: hash160(redeem_script.as_bytes()),
        }
    }

    /// Recover the address a standard locking script pays to
    pub fn from_script(script_pubkey: &Script, network: Network) -> Result<Self, ScriptError> {
        if let Some(hash) = script_pubkey.p2pkh_hash() {
            return Ok(Self {
                network,
                kind: AddressKind::PubkeyHash,
                hash,
            });
        }
        if let Some(hash) = script_pubkey.p2sh_hash() {
            return Ok(Self {
                network,
                kind: AddressKind::ScriptHash,
                hash,
            });
        }
        Err(ScriptError::UnsupportedScript(script_pubkey.to_hex()))
    }

    /// The locking script that pays to this address
    pub fn script_pubkey(&self) -> Script {
        match self.kind {
            AddressKind::PubkeyHash => Script::new_p2pkh(&self.hash),
            AddressKind::ScriptHash => Script::new_p2sh(&self.hash),
        }
    }

    fn version(&self) -> u8 {
        match self.kind {
            AddressKind::PubkeyHash => self.network.p2pkh_version(),
            AddressKind::ScriptHash => self.network.p2sh_version(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(25);
        payload.push(self.version());
        payload.extend_from_slice(&self.hash);
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        f.write_str(&bs58::encode(payload).into_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::InvalidBase58)?;
        if data.len() != 25 {
            return Err(AddressError::InvalidLength(data.len()));
        }

        let (payload, checksum) = data.split_at(21);
        if double_sha256(payload)[..4] != *checksum {
            return Err(AddressError::BadChecksum);
        }

        let (network, kind) = match payload[0] {
            0x00 => (Network::Mainnet, AddressKind::PubkeyHash),
            0x05 => (Network::Mainnet, AddressKind::ScriptHash),
            0x6f => (Network::Testnet, AddressKind::PubkeyHash),
            0xc4 => (Network::Testnet, AddressKind::ScriptHash),
            other => return Err(AddressError::UnknownVersion(other)),
        };

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(Self {
            network,
            kind,
            hash,
        })
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
