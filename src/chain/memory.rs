//! In-memory ledger
//!
//! Keeps an unspent-output set and the transactions it accepted. Every
//! broadcast is decoded, checked input by input with the script
//! interpreter, and applied atomically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::client::{ChainClient, ChainError};
use crate::core::{verify_input, Address, OutPoint, Transaction, Txid, UnspentOutput};
use crate::crypto::double_sha256;

const OFFLINE: &str = "ledger is offline";

#[derive(Debug, Default)]
struct LedgerState {
    /// Ordered so lookups list outputs deterministically
    utxos: BTreeMap<OutPoint, UnspentOutput>,
    accepted: HashMap<Txid, Transaction>,
}

/// In-memory [`ChainClient`]
#[derive(Debug)]
pub struct MemoryChain {
    state: RwLock<LedgerState>,
    available: AtomicBool,
    min_fee: u64,
    broadcast_delay: Option<Duration>,
    seeded: AtomicU64,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            available: AtomicBool::new(true),
            min_fee: 0,
            broadcast_delay: None,
            seeded: AtomicU64::new(0),
        }
    }

    /// Reject transactions paying less than `min_fee`
    pub fn with_min_fee(mut self, min_fee: u64) -> Self {
        self.min_fee = min_fee;
        self
    }

    /// Wait `delay` before answering each broadcast
    pub fn with_broadcast_delay(mut self, delay: Duration) -> Self {
        self.broadcast_delay = Some(delay);
        self
    }

    /// Take the ledger offline while `false`
    ///
    /// Lookups then fail with `LookupUnavailable` and broadcasts with
    /// `BroadcastRejected`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn is_online(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Add an existing unspent output
    pub async fn seed(&self, utxo: UnspentOutput) {
        log::debug!("Seeding {} with {}", utxo.outpoint, utxo.value);
        self.state.write().await.utxos.insert(utxo.outpoint, utxo);
    }

    /// Create an output of `value` locked to `address` out of thin air
    pub async fn seed_address(&self, address: &Address, value: u64) -> UnspentOutput {
        let n = self.seeded.fetch_add(1, Ordering::SeqCst);
        let mut preimage = n.to_le_bytes().to_vec();
        preimage.extend_from_slice(address.to_string().as_bytes());
        let utxo = UnspentOutput {
            outpoint: OutPoint::new(Txid::from_bytes(double_sha256(&preimage)), 0),
            value,
            script_pubkey: address.script_pubkey(),
        };
        self.seed(utxo.clone()).await;
        utxo
    }

    pub async fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.state.read().await.utxos.contains_key(outpoint)
    }

    /// A transaction accepted earlier
    pub async fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.state.read().await.accepted.get(txid).cloned()
    }

    pub async fn accepted_count(&self) -> usize {
        self.state.read().await.accepted.len()
    }

    /// Sum of unspent outputs locked to `address`
    pub async fn balance(&self, address: &Address) -> u64 {
        let script = address.script_pubkey();
        self.state
            .read()
            .await
            .utxos
            .values()
            .filter(|u| u.script_pubkey == script)
            .map(|u| u.value)
            .sum()
    }

    fn validate(&self, state: &LedgerState, tx: &Transaction) -> Result<u64, String> {
        let mut seen = HashSet::new();
        let mut prevouts = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let outpoint = input.previous_output;
            if !seen.insert(outpoint) {
                return Err(format!("input {} spent twice", outpoint));
            }
            let prevout = state
                .utxos
                .get(&outpoint)
                .ok_or_else(|| format!("missing or spent input {}", outpoint))?;
            prevouts.push(prevout.clone());
        }

        for (index, prevout) in prevouts.iter().enumerate() {
            verify_input(tx, index, &prevout.script_pubkey)
                .map_err(|e| format!("input {} failed verification: {}", index, e))?;
        }

        let fee = tx.fee(&prevouts).map_err(|e| e.to_string())?;
        if fee < self.min_fee {
            return Err(format!("fee {} below minimum {}", fee, self.min_fee));
        }
        Ok(fee)
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn fetch_unspent_outputs(
        &self,
        address: &Address,
    ) -> Result<Vec<UnspentOutput>, ChainError> {
        if !self.is_online() {
            return Err(ChainError::LookupUnavailable(OFFLINE.to_string()));
        }
        let script = address.script_pubkey();
        let state = self.state.read().await;
        Ok(state
            .utxos
            .values()
            .filter(|u| u.script_pubkey == script)
            .cloned()
            .collect())
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, ChainError> {
        if !self.is_online() {
            return Err(ChainError::BroadcastRejected(OFFLINE.to_string()));
        }
        if let Some(delay) = self.broadcast_delay {
            tokio::time::sleep(delay).await;
        }

        let tx = Transaction::deserialize(raw_tx)
            .map_err(|e| ChainError::BroadcastRejected(format!("malformed transaction: {}", e)))?;
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ChainError::BroadcastRejected(
                "transaction needs inputs and outputs".to_string(),
            ));
        }
        let txid = tx.txid();

        let mut state = self.state.write().await;
        if state.accepted.contains_key(&txid) {
            log::debug!("Transaction {} already accepted", txid);
            return Ok(txid);
        }

        let fee = self.validate(&state, &tx).map_err(|reason| {
            log::warn!("Rejected transaction {}: {}", txid, reason);
            ChainError::BroadcastRejected(reason)
        })?;

        for input in &tx.inputs {
            state.utxos.remove(&input.previous_output);
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            state.utxos.insert(
                outpoint,
                UnspentOutput {
                    outpoint,
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                },
            );
        }
        state.accepted.insert(txid, tx);

        log::info!("Accepted transaction {} (fee {})", txid, fee);
        Ok(txid)
    }
}
