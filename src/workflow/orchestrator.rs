//! Fund/spend orchestration
//!
//! Moves value from a single-key address into a P2SH multisig output, then
//! spends that output to a destination with the multisig signers. Each call
//! to [`FundSpendWorkflow::step`] performs one transition.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::WorkflowConfig;
use super::error::WorkflowError;
use super::state::{Stage, WorkflowReport, WorkflowState};
use crate::chain::{ChainClient, UtxoReservations};
use crate::core::{
    new_transaction, Address, OutPoint, Payment, Transaction, TransactionBuilder,
    TransactionError, Txid, UnspentOutput,
};
use crate::crypto::KeyPair;
use crate::multisig::MultisigWallet;
use crate::signer::{SignerError, SigningSession};

/// The two-transaction fund → spend pipeline
pub struct FundSpendWorkflow {
    chain: Arc<dyn ChainClient>,
    reservations: UtxoReservations,
    source: KeyPair,
    wallet: MultisigWallet,
    spend_signers: Vec<KeyPair>,
    destination: Address,
    config: WorkflowConfig,

    state: WorkflowState,
    report: WorkflowReport,
    claimed: Option<UnspentOutput>,
    funding: Option<SigningSession>,
    funding_txid: Option<Txid>,
    multisig_output: Option<UnspentOutput>,
    spending: Option<SigningSession>,
    error: Option<WorkflowError>,
}

impl FundSpendWorkflow {
    /// Create a workflow funding `wallet` from `source` and paying the
    /// multisig output on to `destination`
    pub fn new(
        chain: Arc<dyn ChainClient>,
        source: KeyPair,
        wallet: MultisigWallet,
        destination: Address,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            chain,
            reservations: UtxoReservations::new(),
            source,
            wallet,
            spend_signers: Vec::new(),
            destination,
            config,
            state: WorkflowState::Init,
            report: WorkflowReport::new(),
            claimed: None,
            funding: None,
            funding_txid: None,
            multisig_output: None,
            spending: None,
            error: None,
        }
    }

    /// Keys that sign the spend; the first M are used
    pub fn with_spend_signers(mut self, signers: Vec<KeyPair>) -> Self {
        self.spend_signers = signers;
        self
    }

    /// Share a reservation set with other workflows on the same ledger
    pub fn with_reservations(mut self, reservations: UtxoReservations) -> Self {
        self.reservations = reservations;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn report(&self) -> &WorkflowReport {
        &self.report
    }

    pub fn wallet(&self) -> &MultisigWallet {
        &self.wallet
    }

    /// The error that moved the workflow to `Failed`
    pub fn error(&self) -> Option<&WorkflowError> {
        self.error.as_ref()
    }

    /// Drive the workflow to `Done`
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<WorkflowReport, WorkflowError> {
        log::info!(
            "Funding {} ({}) with {} from {}",
            self.wallet.address(),
            self.wallet.description(),
            self.config.fund_amount,
            self.source.address()
        );
        while !self.state.is_terminal() {
            self.step(cancel).await?;
        }
        Ok(self.report.clone())
    }

    /// Perform one transition
    ///
    /// On error the workflow moves to `Failed` and the error is returned,
    /// and kept for [`FundSpendWorkflow::error`]. Calling `step` again after
    /// that returns `Finished`.
    pub async fn step(&mut self, cancel: &CancellationToken) -> Result<&WorkflowState, WorkflowError> {
        if self.state.is_terminal() {
            return Err(WorkflowError::Finished);
        }

        match self.advance(cancel).await {
            Ok(next) => {
                self.transition(next);
                Ok(&self.state)
            }
            Err(err) => {
                // A claimed output stays reserved once the ledger may have
                // seen the funding transaction, including after `Done`
                if !self.state.has_broadcast() && !err.reached_ledger() {
                    self.release_claim().await;
                }
                log::warn!("Workflow failed in {}: {}", self.state, err);
                self.transition(WorkflowState::Failed(err.to_string()));
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        log::debug!("{} -> {}", self.state, next);
        let from = std::mem::replace(&mut self.state, next.clone());
        self.report.record(from, next);
    }

    async fn release_claim(&mut self) {
        if let Some(utxo) = self.claimed.take() {
            self.reservations.release(&utxo.outpoint).await;
        }
    }

    async fn advance(&mut self, cancel: &CancellationToken) -> Result<WorkflowState, WorkflowError> {
        match self.state {
            WorkflowState::Init => {
                self.check_cancelled(cancel)?;
                Ok(WorkflowState::AwaitingUtxo)
            }
            WorkflowState::AwaitingUtxo => {
                self.claim_funding_output(cancel).await?;
                Ok(WorkflowState::Funding)
            }
            WorkflowState::Funding => {
                self.check_cancelled(cancel)?;
                self.sign_funding()?;
                Ok(WorkflowState::FundingSigned)
            }
            WorkflowState::FundingSigned => {
                self.check_cancelled(cancel)?;
                self.broadcast_funding(cancel).await?;
                Ok(WorkflowState::FundingBroadcast)
            }
            WorkflowState::FundingBroadcast => {
                self.check_ambiguous(cancel, Stage::Funding)?;
                self.locate_multisig_output()?;
                Ok(WorkflowState::Spending)
            }
            WorkflowState::Spending => {
                self.check_ambiguous(cancel, Stage::Funding)?;
                self.sign_spending()?;
                Ok(WorkflowState::SpendingSigned)
            }
            WorkflowState::SpendingSigned => {
                self.check_ambiguous(cancel, Stage::Funding)?;
                self.broadcast_spending(cancel).await?;
                Ok(WorkflowState::SpendingBroadcast)
            }
            WorkflowState::SpendingBroadcast => Ok(WorkflowState::Done),
            WorkflowState::Done | WorkflowState::Failed(_) => Err(WorkflowError::Finished),
        }
    }

    fn check_cancelled(&self, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        Ok(())
    }

    /// Cancellation after the funding broadcast leaves value in the
    /// multisig output, which the caller has to reconcile
    fn check_ambiguous(&self, cancel: &CancellationToken, stage: Stage) -> Result<(), WorkflowError> {
        match self.funding_txid {
            Some(txid) if cancel.is_cancelled() => {
                Err(WorkflowError::AmbiguousOutcome { txid, stage })
            }
            _ => Ok(()),
        }
    }

    async fn claim_funding_output(&mut self, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        let address = self.source.address();
        let lookup = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.chain.fetch_unspent_outputs(&address) => Some(result),
        };
        let utxos = lookup
            .ok_or(WorkflowError::Cancelled)?
            .map_err(|source| WorkflowError::Chain {
                stage: Stage::Funding,
                source,
            })?;

        let required = self
            .config
            .fund_amount
            .checked_add(self.config.funding_fee)
            .unwrap_or(u64::MAX);
        let utxo = self
            .reservations
            .claim_first(&utxos, required)
            .await
            .ok_or(WorkflowError::NoSpendableOutput { address, required })?;

        log::info!("Claimed {} worth {}", utxo.outpoint, utxo.value);
        self.claimed = Some(utxo);
        Ok(())
    }

    fn sign_funding(&mut self) -> Result<(), WorkflowError> {
        let utxo = self.claimed.as_ref().ok_or(WorkflowError::Finished)?;
        let built = TransactionBuilder::new()
            .add_input(utxo)
            .add_script_output(self.wallet.locking_script(), self.config.fund_amount)
            .fee(self.config.funding_fee)
            .change(&self.source.address())
            .build()?;

        let mut session =
            SigningSession::new(built, &[])?.with_hash_type(self.config.sighash_type);
        if session.sign(&self.source)? != 1 {
            return Err(SignerError::KeyMismatch {
                input: 0,
                signer: *self.source.public_key(),
            }
            .into());
        }
        session.verify()?;

        self.report.funding_fee = Some(session.fee());
        self.funding = Some(session);
        Ok(())
    }

    async fn broadcast_funding(&mut self, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        let session = self.funding.clone().ok_or(WorkflowError::Finished)?;
        let tx = session.finalize()?;
        let txid = self.broadcast(&tx, Stage::Funding, cancel).await?;
        log::info!("Funded {} in {}", self.wallet.address(), txid);
        self.funding_txid = Some(txid);
        self.report.funding_txid = Some(txid);
        Ok(())
    }

    /// Find the funding output paying the multisig locking script
    fn locate_multisig_output(&mut self) -> Result<(), WorkflowError> {
        let session = self.funding.as_ref().ok_or(WorkflowError::Finished)?;
        let txid = self.funding_txid.ok_or(WorkflowError::Finished)?;
        let locking = self.wallet.locking_script();

        let (vout, output) = session
            .transaction()
            .outputs
            .iter()
            .enumerate()
            .find(|(_, o)| o.script_pubkey == locking)
            .ok_or(WorkflowError::MultisigOutputNotFound(txid))?;

        self.multisig_output = Some(UnspentOutput {
            outpoint: OutPoint::new(txid, vout as u32),
            value: output.value,
            script_pubkey: output.script_pubkey.clone(),
        });
        Ok(())
    }

    fn sign_spending(&mut self) -> Result<(), WorkflowError> {
        let utxo = self.multisig_output.as_ref().ok_or(WorkflowError::Finished)?;
        let amount = utxo
            .value
            .checked_sub(self.config.spending_fee)
            .ok_or(TransactionError::InsufficientFunds {
                available: utxo.value,
                required: self.config.spending_fee,
            })?;
        let built = new_transaction(
            std::slice::from_ref(utxo),
            &[Payment::to_address(self.destination, amount)],
        )?;

        let redeem = self.wallet.redeem_script().clone();
        let mut session =
            SigningSession::new(built, &[redeem])?.with_hash_type(self.config.sighash_type);

        let threshold = self.wallet.threshold();
        if let Some(outsider) = self
            .spend_signers
            .iter()
            .find(|k| !self.wallet.is_signer(k.public_key()))
        {
            return Err(SignerError::UnknownSigner(*outsider.public_key()).into());
        }
        if self.spend_signers.len() < threshold {
            return Err(SignerError::InsufficientSignatures {
                have: self.spend_signers.len(),
                need: threshold,
            }
            .into());
        }
        for signer in self.spend_signers.iter().take(threshold) {
            session.sign_input(0, signer)?;
        }
        session.verify()?;

        self.report.spending_fee = Some(session.fee());
        self.spending = Some(session);
        Ok(())
    }

    async fn broadcast_spending(&mut self, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        let session = self.spending.clone().ok_or(WorkflowError::Finished)?;
        let tx = session.finalize()?;
        let txid = self.broadcast(&tx, Stage::Spending, cancel).await?;
        log::info!("Spent multisig output to {} in {}", self.destination, txid);
        self.report.spending_txid = Some(txid);
        Ok(())
    }

    /// Submit `tx`, bounded by the configured timeout and `cancel`
    ///
    /// Once the request is in flight, neither a timeout nor a cancellation
    /// says whether the ledger accepted it.
    async fn broadcast(
        &self,
        tx: &Transaction,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<Txid, WorkflowError> {
        let expected = tx.txid();
        let raw = tx.serialize();
        log::debug!("Broadcasting {} ({} bytes)", expected, raw.len());

        let ambiguous = WorkflowError::AmbiguousOutcome {
            txid: expected,
            stage,
        };
        let pending = tokio::time::timeout(self.config.broadcast_timeout(), self.chain.broadcast(&raw));
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = pending => Some(result),
        };

        let txid = match result {
            Some(Ok(answer)) => answer.map_err(|source| WorkflowError::Chain { stage, source })?,
            // Cancelled or timed out with the request in flight
            _ => return Err(ambiguous),
        };
        if txid != expected {
            return Err(WorkflowError::TxidMismatch { expected, got: txid });
        }
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::chain::{ChainError, MemoryChain};
    use crate::core::{verify_input, Network};
    use crate::crypto::PublicKey;

    const SOURCE_KEY: &str = "8c026a359a13f707a3497ef58da45b628958ff98b5f33322cf29ede12fcfd56f";
    const SIGNER1_KEY: &str = "612b3ca3f368cf2658c2e1777d2fa28e6bcde8ea19312cbf69e09e7333e13994";
    const SIGNER2_KEY: &str = "d65788b9947b41625ffff946bc145187c6b85d1686e60becdf34567f17478730";

    struct Fixture {
        chain: Arc<MemoryChain>,
        source: KeyPair,
        signers: Vec<KeyPair>,
        wallet: MultisigWallet,
        config: WorkflowConfig,
    }

    fn fixture_with(chain: MemoryChain, config: WorkflowConfig) -> Fixture {
        let source = KeyPair::from_private_key_hex(SOURCE_KEY, Network::Testnet).unwrap();
        let signers = vec![
            KeyPair::from_private_key_hex(SIGNER1_KEY, Network::Testnet).unwrap(),
            KeyPair::from_private_key_hex(SIGNER2_KEY, Network::Testnet).unwrap(),
        ];
        let pubkeys: Vec<PublicKey> = signers.iter().map(|k| *k.public_key()).collect();
        let wallet = config.multisig_wallet(pubkeys).unwrap();
        Fixture {
            chain: Arc::new(chain),
            source,
            signers,
            wallet,
            config,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryChain::new(), WorkflowConfig::default())
    }

    impl Fixture {
        /// Spends back to the source, like the reference run
        fn workflow(&self, spend_signers: Vec<KeyPair>) -> FundSpendWorkflow {
            self.workflow_to(spend_signers, self.source.address())
        }

        fn workflow_to(&self, spend_signers: Vec<KeyPair>, destination: Address) -> FundSpendWorkflow {
            FundSpendWorkflow::new(
                self.chain.clone(),
                self.source.clone(),
                self.wallet.clone(),
                destination,
                self.config.clone(),
            )
            .with_spend_signers(spend_signers)
        }
    }

    #[tokio::test]
    async fn test_fund_and_spend_end_to_end() {
        let f = fixture();
        let funding_utxo = f.chain.seed_address(&f.source.address(), 100_000).await;
        let mut workflow = f.workflow(vec![f.signers[1].clone()]);

        let report = workflow.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(workflow.state(), &WorkflowState::Done);
        assert_eq!(
            report.path(),
            vec![
                &WorkflowState::AwaitingUtxo,
                &WorkflowState::Funding,
                &WorkflowState::FundingSigned,
                &WorkflowState::FundingBroadcast,
                &WorkflowState::Spending,
                &WorkflowState::SpendingSigned,
                &WorkflowState::SpendingBroadcast,
                &WorkflowState::Done,
            ]
        );
        assert_eq!(report.funding_fee, Some(0));
        assert_eq!(report.spending_fee, Some(0));

        // Funding: 1,000 to the P2SH script, 99,000 change
        let funding = f
            .chain
            .transaction(&report.funding_txid.unwrap())
            .await
            .unwrap();
        assert_eq!(funding.inputs[0].previous_output, funding_utxo.outpoint);
        assert_eq!(funding.outputs[0].value, 1_000);
        assert_eq!(funding.outputs[0].script_pubkey, f.wallet.locking_script());
        assert_eq!(funding.outputs[1].value, 99_000);
        assert_eq!(
            funding.outputs[1].script_pubkey,
            f.source.address().script_pubkey()
        );
        assert_eq!(funding.total_output(), funding_utxo.value);
        verify_input(&funding, 0, &funding_utxo.script_pubkey).unwrap();

        // Spending: the P2SH output back to the source with one signature
        let spending = f
            .chain
            .transaction(&report.spending_txid.unwrap())
            .await
            .unwrap();
        assert_eq!(
            spending.inputs[0].previous_output,
            OutPoint::new(report.funding_txid.unwrap(), 0)
        );
        assert_eq!(spending.outputs[0].value, 1_000);
        verify_input(&spending, 0, &f.wallet.locking_script()).unwrap();

        assert_eq!(f.chain.balance(&f.source.address()).await, 100_000);
        assert_eq!(f.chain.balance(&f.wallet.address()).await, 0);
    }

    #[tokio::test]
    async fn test_two_of_two_with_fees() {
        let config = WorkflowConfig {
            threshold: 2,
            funding_fee: 500,
            spending_fee: 200,
            ..Default::default()
        };
        let f = fixture_with(MemoryChain::new().with_min_fee(100), config);
        f.chain.seed_address(&f.source.address(), 10_000).await;
        let mut workflow = f.workflow(f.signers.clone());

        let report = workflow.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.funding_fee, Some(500));
        assert_eq!(report.spending_fee, Some(200));
        assert_eq!(f.chain.balance(&f.source.address()).await, 10_000 - 700);
    }

    #[tokio::test]
    async fn test_too_few_spend_signers() {
        let config = WorkflowConfig {
            threshold: 2,
            ..Default::default()
        };
        let f = fixture_with(MemoryChain::new(), config);
        f.chain.seed_address(&f.source.address(), 10_000).await;
        let mut workflow = f.workflow(vec![f.signers[0].clone()]);

        let err = workflow.run(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            WorkflowError::SignerError(SignerError::InsufficientSignatures { have: 1, need: 2 })
        );
        assert!(matches!(workflow.state(), WorkflowState::Failed(_)));
        assert_eq!(workflow.error(), Some(&err));
        // Funding went out before the failure
        assert!(workflow.report().funding_txid.is_some());
    }

    #[tokio::test]
    async fn test_no_spendable_output() {
        let f = fixture();
        f.chain.seed_address(&f.source.address(), 999).await;
        let mut workflow = f.workflow(vec![f.signers[0].clone()]);

        let err = workflow.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NoSpendableOutput { required: 1_000, .. }
        ));
        assert_eq!(f.chain.accepted_count().await, 0);
        assert!(matches!(
            workflow.step(&CancellationToken::new()).await,
            Err(WorkflowError::Finished)
        ));
    }

    #[tokio::test]
    async fn test_lookup_unavailable() {
        let f = fixture();
        f.chain.set_available(false);
        let mut workflow = f.workflow(vec![f.signers[0].clone()]);

        let err = workflow.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Chain {
                stage: Stage::Funding,
                source: ChainError::LookupUnavailable(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_broadcast_rejected_releases_claim() {
        let f = fixture_with(
            MemoryChain::new().with_min_fee(1),
            WorkflowConfig::default(),
        );
        let utxo = f.chain.seed_address(&f.source.address(), 5_000).await;
        let reservations = UtxoReservations::new();
        let mut workflow = f
            .workflow(vec![f.signers[0].clone()])
            .with_reservations(reservations.clone());

        let err = workflow.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Chain {
                stage: Stage::Funding,
                source: ChainError::BroadcastRejected(_)
            }
        ));
        assert!(!reservations.is_claimed(&utxo.outpoint).await);
        assert!(f.chain.is_unspent(&utxo.outpoint).await);
    }

    #[tokio::test]
    async fn test_offline_during_funding_broadcast() {
        let f = fixture();
        let utxo = f.chain.seed_address(&f.source.address(), 5_000).await;
        let reservations = UtxoReservations::new();
        let mut workflow = f
            .workflow(vec![f.signers[0].clone()])
            .with_reservations(reservations.clone());
        let cancel = CancellationToken::new();

        while workflow.state() != &WorkflowState::FundingSigned {
            workflow.step(&cancel).await.unwrap();
        }
        f.chain.set_available(false);

        let err = workflow.step(&cancel).await.unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Chain {
                stage: Stage::Funding,
                source: ChainError::BroadcastRejected("ledger is offline".to_string()),
            }
        );
        assert_eq!(workflow.error(), Some(&err));
        assert!(!reservations.is_claimed(&utxo.outpoint).await);
        assert!(f.chain.is_unspent(&utxo.outpoint).await);
        assert!(workflow.report().funding_txid.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_broadcast() {
        let f = fixture();
        let utxo = f.chain.seed_address(&f.source.address(), 5_000).await;
        let reservations = UtxoReservations::new();
        let mut workflow = f
            .workflow(vec![f.signers[0].clone()])
            .with_reservations(reservations.clone());
        let cancel = CancellationToken::new();

        // Init -> AwaitingUtxo -> Funding -> FundingSigned
        for _ in 0..3 {
            workflow.step(&cancel).await.unwrap();
        }
        assert_eq!(workflow.state(), &WorkflowState::FundingSigned);
        assert!(reservations.is_claimed(&utxo.outpoint).await);

        cancel.cancel();
        assert_eq!(
            workflow.step(&cancel).await.unwrap_err(),
            WorkflowError::Cancelled
        );
        assert!(!reservations.is_claimed(&utxo.outpoint).await);
        assert_eq!(f.chain.accepted_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_funding_is_ambiguous() {
        let f = fixture();
        f.chain.seed_address(&f.source.address(), 5_000).await;
        let mut workflow = f.workflow(vec![f.signers[0].clone()]);
        let cancel = CancellationToken::new();

        while workflow.state() != &WorkflowState::FundingBroadcast {
            workflow.step(&cancel).await.unwrap();
        }
        let funding_txid = workflow.report().funding_txid.unwrap();

        cancel.cancel();
        assert_eq!(
            workflow.step(&cancel).await.unwrap_err(),
            WorkflowError::AmbiguousOutcome {
                txid: funding_txid,
                stage: Stage::Funding
            }
        );
    }

    #[tokio::test]
    async fn test_broadcast_timeout_is_ambiguous() {
        let config = WorkflowConfig {
            broadcast_timeout_ms: 20,
            ..Default::default()
        };
        let f = fixture_with(
            MemoryChain::new().with_broadcast_delay(Duration::from_secs(5)),
            config,
        );
        f.chain.seed_address(&f.source.address(), 5_000).await;
        let mut workflow = f.workflow(vec![f.signers[0].clone()]);

        let err = workflow.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::AmbiguousOutcome {
                stage: Stage::Funding,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_broadcast_is_ambiguous() {
        let f = fixture_with(
            MemoryChain::new().with_broadcast_delay(Duration::from_secs(5)),
            WorkflowConfig::default(),
        );
        f.chain.seed_address(&f.source.address(), 5_000).await;
        let mut workflow = f.workflow(vec![f.signers[0].clone()]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = workflow.run(&cancel).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AmbiguousOutcome { .. }));
    }

    /// Ledger that answers every broadcast with a fixed id
    struct WrongIdChain(MemoryChain);

    #[async_trait]
    impl ChainClient for WrongIdChain {
        async fn fetch_unspent_outputs(
            &self,
            address: &Address,
        ) -> Result<Vec<UnspentOutput>, ChainError> {
            self.0.fetch_unspent_outputs(address).await
        }

        async fn broadcast(&self, _raw_tx: &[u8]) -> Result<Txid, ChainError> {
            Ok(Txid::from_bytes([0xee; 32]))
        }
    }

    #[tokio::test]
    async fn test_txid_mismatch_keeps_claim() {
        let f = fixture();
        let memory = MemoryChain::new();
        let utxo = memory.seed_address(&f.source.address(), 5_000).await;
        let reservations = UtxoReservations::new();
        let mut workflow = FundSpendWorkflow::new(
            Arc::new(WrongIdChain(memory)),
            f.source.clone(),
            f.wallet.clone(),
            f.source.address(),
            f.config.clone(),
        )
        .with_spend_signers(vec![f.signers[0].clone()])
        .with_reservations(reservations.clone());

        let err = workflow.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::TxidMismatch { got, .. } if got == Txid::from_bytes([0xee; 32])));
        // The ledger accepted something, so the input may be gone
        assert!(reservations.is_claimed(&utxo.outpoint).await);
    }

    /// Ledger whose lookups keep returning an old view of the UTXO set
    struct LaggingChain {
        inner: Arc<MemoryChain>,
        view: Vec<UnspentOutput>,
    }

    #[async_trait]
    impl ChainClient for LaggingChain {
        async fn fetch_unspent_outputs(
            &self,
            _address: &Address,
        ) -> Result<Vec<UnspentOutput>, ChainError> {
            Ok(self.view.clone())
        }

        async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, ChainError> {
            self.inner.broadcast(raw_tx).await
        }
    }

    #[tokio::test]
    async fn test_spent_output_is_not_reclaimed_from_stale_lookup() {
        let f = fixture();
        let utxo = f.chain.seed_address(&f.source.address(), 100_000).await;
        let view = f.chain.fetch_unspent_outputs(&f.source.address()).await.unwrap();
        let reservations = UtxoReservations::new();

        let mut first = f
            .workflow(vec![f.signers[1].clone()])
            .with_reservations(reservations.clone());
        let report = first.run(&CancellationToken::new()).await.unwrap();
        assert!(!f.chain.is_unspent(&utxo.outpoint).await);
        assert!(reservations.is_claimed(&utxo.outpoint).await);

        let lagging = LaggingChain {
            inner: f.chain.clone(),
            view,
        };
        let mut second = FundSpendWorkflow::new(
            Arc::new(lagging),
            f.source.clone(),
            f.wallet.clone(),
            f.source.address(),
            f.config.clone(),
        )
        .with_spend_signers(vec![f.signers[1].clone()])
        .with_reservations(reservations.clone());

        let err = second.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NoSpendableOutput { required: 1_000, .. }
        ));
        assert!(second.report().funding_txid.is_none());
        assert_eq!(f.chain.accepted_count().await, 2);
        assert!(report.spending_txid.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_workflows_never_share_an_output() {
        let f = fixture();
        // Change would be dust, so funding leaves nothing else to claim
        f.chain.seed_address(&f.source.address(), 1_500).await;
        f.chain.seed_address(&f.source.address(), 1_500).await;
        let reservations = UtxoReservations::new();
        let destination = KeyPair::generate(Network::Testnet).address();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let mut workflow = f
                    .workflow_to(vec![f.signers[0].clone()], destination)
                    .with_reservations(reservations.clone());
                tokio::spawn(async move { workflow.run(&CancellationToken::new()).await })
            })
            .collect();

        let mut done = 0;
        let mut starved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => done += 1,
                Err(WorkflowError::NoSpendableOutput { .. }) => starved += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!((done, starved), (2, 1));
    }
}
