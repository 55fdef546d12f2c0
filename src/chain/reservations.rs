//! Outputs claimed by in-flight workflows

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::{OutPoint, UnspentOutput};

/// Shared set of outpoints that some workflow intends to spend
///
/// Cloning shares the underlying set.
#[derive(Debug, Clone, Default)]
pub struct UtxoReservations {
    claimed: Arc<Mutex<HashSet<OutPoint>>>,
}

impl UtxoReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `outpoint`, returning false if it is already claimed
    pub async fn try_claim(&self, outpoint: OutPoint) -> bool {
        self.claimed.lock().await.insert(outpoint)
    }

    /// Claim the first candidate worth at least `min_value` that nobody else
    /// holds
    ///
    /// Check and insert happen under one lock, so two callers never receive
    /// the same output.
    pub async fn claim_first(
        &self,
        candidates: &[UnspentOutput],
        min_value: u64,
    ) -> Option<UnspentOutput> {
        let mut claimed = self.claimed.lock().await;
        let found = candidates
            .iter()
            .find(|u| u.value >= min_value && !claimed.contains(&u.outpoint))?;
        claimed.insert(found.outpoint);
        Some(found.clone())
    }

    pub async fn release(&self, outpoint: &OutPoint) {
        self.claimed.lock().await.remove(outpoint);
    }

    pub async fn is_claimed(&self, outpoint: &OutPoint) -> bool {
        self.claimed.lock().await.contains(outpoint)
    }

    pub async fn len(&self) -> usize {
        self.claimed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.claimed.lock().await.is_empty()
    }
}
