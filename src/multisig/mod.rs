//! Multi-signature wallet and transaction support
//!
//! Provides M-of-N threshold signature wallets where M signatures
//! from N authorized signers are required to spend funds held at a
//! P2SH address.
//!
//! # Example
//!
//! ```ignore
//! use mini_multisig::multisig::{MultisigConfig, MultisigWallet};
//!
//! // Create a 2-of-3 multisig wallet
//! let config = MultisigConfig::new(2, vec![pubkey1, pubkey2, pubkey3], None)?.sorted();
//! let wallet = MultisigWallet::new(config, Network::Testnet)?;
//!
//! // Fund wallet.address(), then spend with a SigningSession
//! let mut session = SigningSession::new(built, &[wallet.redeem_script().clone()])?;
//! session.sign(&key1)?;
//! session.sign(&key2)?;
//! let tx = session.finalize()?;
//! ```

pub mod transaction;
pub mod wallet;

pub use transaction::{MultisigSignature, PartialMultisigInput, PendingStatus};
pub use wallet::{MultisigConfig, MultisigWallet};
