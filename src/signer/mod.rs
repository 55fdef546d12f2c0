//! Transaction signing
//!
//! - Deterministic ECDSA signatures over legacy signature hashes
//! - Unlocking scripts for P2PKH and P2SH multisig inputs
//! - Signing sessions that collect signatures from several parties

pub mod session;
pub mod sign;
pub mod signature;

pub use session::{InputSigner, SigningSession, SigningStatus};
pub use sign::{assemble_multisig_unlocking_script, p2pkh_unlocking_script, sign_input, SignerError};
pub use signature::Signature;
