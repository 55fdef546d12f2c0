//! Script construction and inspection
//!
//! Scripts are kept as their raw serialized bytes, which is what gets hashed
//! into P2SH addresses and signature hashes. Building goes through
//! [`ScriptBuilder`] so pushes always use the shortest encoding.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::address::{Address, Network};
use crate::crypto::{hash160, PublicKey};

// =============================================================================
// Script Constants
// =============================================================================

/// Maximum number of public keys in a standard multisig script
pub const MAX_MULTISIG_KEYS: usize = 16;

/// Maximum size of a single pushed stack element (consensus)
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum serialized script size (consensus)
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Opcodes used by the templates and the verifier
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_NOP: u8 = 0x61;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_SHA256: u8 = 0xa8;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;
    pub const OP_CODESEPARATOR: u8 = 0xab;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
}

use opcodes::*;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid threshold: {threshold} of {keys} keys")]
    InvalidThreshold { threshold: usize, keys: usize },
    #[error("Too many keys: {0}, at most 16 allowed")]
    TooManyKeys(usize),
    #[error("Duplicate public key: {0}")]
    DuplicateKey(String),
    #[error("Unsupported script: {0}")]
    UnsupportedScript(String),
    #[error("Push runs past end of script")]
    TruncatedPush,
    #[error("Script too large: {0} bytes")]
    ScriptTooLarge(usize),
    #[error("Pushed element too large: {0} bytes")]
    PushTooLarge(usize),
    #[error("Stack underflow at opcode {0:#04x}")]
    StackUnderflow(u8),
    #[error("Unsupported opcode {0:#04x}")]
    UnsupportedOpcode(u8),
    #[error("Invalid number encoding")]
    InvalidNumber,
    #[error("{0} failed")]
    VerifyFailed(&'static str),
    #[error("Script evaluated to false")]
    EvalFalse,
    #[error("Unlocking script must be push-only")]
    SigPushOnly,
    #[error("CHECKMULTISIG dummy element must be empty")]
    NullDummy,
    #[error("Script execution failed: {0}")]
    ExecutionFailed(String),
}

// =============================================================================
// Script
// =============================================================================

/// A serialized script
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Script(Vec<u8>);

/// One decoded script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Data push (OP_0 pushes the empty slice)
    Push(&'a [u8]),
    /// Any non-push opcode
    Op(u8),
}

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn new_p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        ScriptBuilder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// `OP_HASH160 <hash> OP_EQUAL`
    pub fn new_p2sh(script_hash: &[u8; 20]) -> Self {
        ScriptBuilder::new()
            .push_opcode(OP_HASH160)
            .push_slice(script_hash)
            .push_opcode(OP_EQUAL)
            .into_script()
    }

    /// Iterate over the script's instructions
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { data: &self.0 }
    }

    /// Pubkey hash if this is a P2PKH locking script
    pub fn p2pkh_hash(&self) -> Option<[u8; 20]> {
        let b = &self.0;
        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[3..23]);
            Some(hash)
        } else {
            None
        }
    }

    /// Script hash if this is a P2SH locking script
    pub fn p2sh_hash(&self) -> Option<[u8; 20]> {
        let b = &self.0;
        if b.len() == 23 && b[0] == OP_HASH160 && b[1] == 20 && b[22] == OP_EQUAL {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[2..22]);
            Some(hash)
        } else {
            None
        }
    }

    pub fn is_p2pkh(&self) -> bool {
        self.p2pkh_hash().is_some()
    }

    pub fn is_p2sh(&self) -> bool {
        self.p2sh_hash().is_some()
    }

    /// True if the script contains only data pushes (and small integers)
    pub fn is_push_only(&self) -> bool {
        self.instructions().all(|ins| match ins {
            Ok(Instruction::Push(_)) => true,
            Ok(Instruction::Op(op)) => op == OP_1NEGATE || (OP_1..=OP_16).contains(&op),
            Err(_) => false,
        })
    }

    /// Copy of the script with every OP_CODESEPARATOR removed
    ///
    /// Works on the raw bytes so non-minimal pushes survive unchanged.
    pub fn without_code_separators(&self) -> Script {
        let mut out = Vec::with_capacity(self.0.len());
        let mut iter = self.instructions();
        let mut offset = 0;
        while let Some(ins) = iter.next() {
            let consumed = self.0.len() - iter.data.len();
            match ins {
                Ok(Instruction::Op(OP_CODESEPARATOR)) => {}
                Ok(_) => out.extend_from_slice(&self.0[offset..consumed]),
                Err(_) => {
                    out.extend_from_slice(&self.0[offset..]);
                    break;
                }
            }
            offset = consumed;
        }
        Script(out)
    }

    /// Human-readable opcode listing, for logs
    pub fn to_asm(&self) -> String {
        let mut parts = Vec::new();
        for ins in self.instructions() {
            match ins {
                Ok(Instruction::Push(data)) if data.is_empty() => parts.push("OP_0".to_string()),
                Ok(Instruction::Push(data)) => parts.push(hex::encode(data)),
                Ok(Instruction::Op(op)) => parts.push(opcode_name(op)),
                Err(_) => {
                    parts.push("[error]".to_string());
                    break;
                }
            }
        }
        parts.join(" ")
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_asm())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

fn opcode_name(op: u8) -> String {
    match op {
        OP_1NEGATE => "OP_1NEGATE".to_string(),
        OP_1..=OP_16 => format!("OP_{}", op - OP_1 + 1),
        OP_NOP => "OP_NOP".to_string(),
        OP_VERIFY => "OP_VERIFY".to_string(),
        OP_RETURN => "OP_RETURN".to_string(),
        OP_DROP => "OP_DROP".to_string(),
        OP_DUP => "OP_DUP".to_string(),
        OP_EQUAL => "OP_EQUAL".to_string(),
        OP_EQUALVERIFY => "OP_EQUALVERIFY".to_string(),
        OP_SHA256 => "OP_SHA256".to_string(),
        OP_HASH160 => "OP_HASH160".to_string(),
        OP_HASH256 => "OP_HASH256".to_string(),
        OP_CODESEPARATOR => "OP_CODESEPARATOR".to_string(),
        OP_CHECKSIG => "OP_CHECKSIG".to_string(),
        OP_CHECKSIGVERIFY => "OP_CHECKSIGVERIFY".to_string(),
        OP_CHECKMULTISIG => "OP_CHECKMULTISIG".to_string(),
        OP_CHECKMULTISIGVERIFY => "OP_CHECKMULTISIGVERIFY".to_string(),
        other => format!("OP_UNKNOWN_{:02x}", other),
    }
}

/// Iterator over script instructions
pub struct Instructions<'a> {
    data: &'a [u8],
}

impl<'a> Instructions<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ScriptError> {
        if self.data.len() < n {
            self.data = &[];
            return Err(ScriptError::TruncatedPush);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn take_len(&mut self, width: usize) -> Result<usize, ScriptError> {
        let bytes = self.take(width)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&op, rest) = self.data.split_first()?;
        self.data = rest;

        let len = match op {
            OP_0 => return Some(Ok(Instruction::Push(&[]))),
            0x01..=0x4b => Ok(op as usize),
            OP_PUSHDATA1 => self.take_len(1),
            OP_PUSHDATA2 => self.take_len(2),
            OP_PUSHDATA4 => self.take_len(4),
            _ => return Some(Ok(Instruction::Op(op))),
        };

        Some(len.and_then(|n| self.take(n)).map(Instruction::Push))
    }
}

// =============================================================================
// Script Builder
// =============================================================================

/// Incremental script construction with minimal push encoding
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bare opcode
    pub fn push_opcode(mut self, op: u8) -> Self {
        self.bytes.push(op);
        self
    }

    /// Append a data push using the shortest length prefix
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        let len = data.len();
        match len {
            0 => self.bytes.push(OP_0),
            1..=0x4b => self.bytes.push(len as u8),
            0x4c..=0xff => {
                self.bytes.push(OP_PUSHDATA1);
                self.bytes.push(len as u8);
            }
            0x100..=0xffff => {
                self.bytes.push(OP_PUSHDATA2);
                self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
            }
            _ => {
                self.bytes.push(OP_PUSHDATA4);
                self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Append a small integer (0..=16) as OP_0 / OP_1..OP_16
    pub fn push_small_int(self, n: u8) -> Self {
        debug_assert!(n <= 16);
        if n == 0 {
            self.push_opcode(OP_0)
        } else {
            self.push_opcode(OP_1 + n - 1)
        }
    }

    pub fn push_key(self, key: &PublicKey) -> Self {
        self.push_slice(&key.serialize())
    }

    pub fn into_script(self) -> Script {
        Script(self.bytes)
    }
}

// =============================================================================
// Multisig and P2SH Templates
// =============================================================================

/// Build `OP_M <key1> .. <keyN> OP_N OP_CHECKMULTISIG`
///
/// Key order is kept exactly as given; the script hash (and so the P2SH
/// address) depends on it, so spending must rebuild with the same order.
pub fn build_multisig_redeem_script(
    public_keys: &[PublicKey],
    threshold: usize,
) -> Result<Script, ScriptError> {
    let n = public_keys.len();
    if n > MAX_MULTISIG_KEYS {
        return Err(ScriptError::TooManyKeys(n));
    }
    if threshold == 0 || threshold > n {
        return Err(ScriptError::InvalidThreshold { threshold, keys: n });
    }
    for (i, key) in public_keys.iter().enumerate() {
        if public_keys[..i].contains(key) {
            return Err(ScriptError::DuplicateKey(key.to_hex()));
        }
    }

    let builder = public_keys
        .iter()
        .fold(ScriptBuilder::new().push_small_int(threshold as u8), |b, key| {
            b.push_key(key)
        });

    Ok(builder
        .push_small_int(n as u8)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// Wrap a redeem script's HASH160 in a P2SH locking script
pub fn script_hash_locking_script(redeem_script: &Script) -> Script {
    Script::new_p2sh(&hash160(redeem_script.as_bytes()))
}

/// Address of a standard (P2PKH or P2SH) locking script
pub fn address_from_script(locking_script: &Script, network: Network) -> Result<Address, ScriptError> {
    Address::from_script(locking_script, network)
}

/// Decode a multisig redeem script into its threshold and ordered keys
pub fn parse_multisig(script: &Script) -> Result<(usize, Vec<PublicKey>), ScriptError> {
    let unsupported = || ScriptError::UnsupportedScript(script.to_hex());

    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()?;
    if instructions.len() < 4 {
        return Err(unsupported());
    }

    let small_int = |ins: &Instruction| match ins {
        Instruction::Op(op) if (OP_1..=OP_16).contains(op) => Some((op - OP_1 + 1) as usize),
        _ => None,
    };

    let last = instructions.len() - 1;
    if instructions[last] != Instruction::Op(OP_CHECKMULTISIG) {
        return Err(unsupported());
    }
    let m = small_int(&instructions[0]).ok_or_else(unsupported)?;
    let n = small_int(&instructions[last - 1]).ok_or_else(unsupported)?;

    let keys = instructions[1..last - 1]
        .iter()
        .map(|ins| match ins {
            Instruction::Push(data) => PublicKey::from_slice(data).map_err(|_| unsupported()),
            Instruction::Op(_) => Err(unsupported()),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if keys.len() != n || m > n {
        return Err(unsupported());
    }
    Ok((m, keys))
}

// =============================================================================
// Tests
// =============================================================================
