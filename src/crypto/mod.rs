//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / double SHA-256 / HASH160 digests
//! - secp256k1 key management and deterministic ECDSA

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, hash160, sha256, sha256_hex};
pub use keys::{
    derive_address, derive_public_key, KeyError, KeyPair, PrivateKey, PublicKey,
    COMPRESSED_PUBLIC_KEY_SIZE,
};
