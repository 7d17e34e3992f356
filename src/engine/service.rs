//! Verification Service
//!
//! Boundary facade: the inbound submission API, the outbound read-only
//! queries and event stream, and control of the reconciliation loop.

use std::sync::Arc;

use secp256k1::PublicKey;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::core::time::Clock;
use crate::engine::events::{CommitmentStateChanged, EventBus};
use crate::engine::reconcile::Reconciler;
use crate::engine::scheduler::{EngineConfig, ScanReport, Scheduler};
use crate::ledger::commitment::{Commitment, CommitmentId, Eligibility, NewCommitment};
use crate::ledger::registry::{AppliedTransition, CommitmentLedger, LedgerError};
use crate::oracle::client::OracleClient;
use crate::proof::validator::{CommitmentClaim, ProofError, ProofValidator};

/// Rejected submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Proof did not validate.
    #[error("proof rejected: {0}")]
    Proof(#[from] ProofError),
    /// Ledger refused the insert.
    #[error("ledger rejected: {0}")]
    Ledger(#[from] LedgerError),
}

/// The verification core behind one handle.
pub struct VerificationService {
    validator: ProofValidator,
    ledger: Arc<CommitmentLedger>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
}

impl VerificationService {
    /// Wire the service together.
    pub fn new(
        validator: ProofValidator,
        ledger: Arc<CommitmentLedger>,
        oracle: Arc<OracleClient>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            oracle,
            validator.clone(),
            clock.clone(),
            events.clone(),
            config.pass_deadline,
        ));
        let scheduler = Scheduler::new(reconciler.clone(), ledger.clone(), clock.clone(), config);

        Self {
            validator,
            ledger,
            clock,
            events,
            reconciler,
            scheduler,
        }
    }

    /// Validate a proof and record a `Provisional` commitment.
    #[instrument(skip(self, owner, proof))]
    pub async fn submit_commitment(
        &self,
        owner: PublicKey,
        btc_address: &str,
        amount_satoshis: u64,
        proof: &[u8],
    ) -> Result<CommitmentId, SubmitError> {
        let claim = CommitmentClaim {
            owner: &owner,
            btc_address,
            amount_satoshis,
        };
        let envelope = self
            .validator
            .validate(&claim, proof, &owner, self.clock.now())
            .map_err(|e| {
                warn!(error = %e, "commitment proof rejected");
                e
            })?;

        let new = NewCommitment {
            owner,
            btc_address: btc_address.to_string(),
            amount_satoshis,
            proof: proof.to_vec(),
            signed_at: envelope.signed_at,
            nonce: envelope.nonce,
        };
        let id = self.ledger.insert_provisional(new, self.clock.now()).await?;
        info!(commitment_id = %id, "commitment accepted");
        Ok(id)
    }

    /// Latest commitment for `(owner, btc_address)`.
    pub async fn get_commitment_state(&self, owner: &PublicKey, btc_address: &str) -> Option<Commitment> {
        self.ledger.latest_for(owner, btc_address).await
    }

    /// Commitment by id.
    pub async fn get_commitment(&self, id: CommitmentId) -> Option<Commitment> {
        self.ledger.get(id).await
    }

    /// Reward eligibility for `(owner, btc_address)`; `None` if never committed.
    pub async fn eligibility(&self, owner: &PublicKey, btc_address: &str) -> Option<Eligibility> {
        self.get_commitment_state(owner, btc_address)
            .await
            .map(|c| c.eligibility())
    }

    /// Every commitment made for `(owner, btc_address)`.
    pub async fn history(&self, owner: &PublicKey, btc_address: &str) -> Vec<Commitment> {
        self.ledger.history(owner, btc_address).await
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitmentStateChanged> {
        self.events.subscribe()
    }

    /// Run one reconciliation pass for `id` right now, inline.
    pub async fn reconcile_now(&self, id: CommitmentId) -> Result<Option<AppliedTransition>, LedgerError> {
        self.reconciler.reconcile(id).await
    }

    /// One scheduler scan, then wait for its passes to finish.
    pub async fn run_scan_once(&self) -> ScanReport {
        let report = self.scheduler.scan_once().await;
        self.scheduler.wait_idle().await;
        report
    }

    /// Run the reconciliation loop until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        self.scheduler.run().await
    }

    /// Stop the reconciliation loop.
    pub fn shutdown(&self) {
        self.scheduler.shutdown()
    }

    /// The ledger.
    pub fn ledger(&self) -> &Arc<CommitmentLedger> {
        &self.ledger
    }
}

// =============================================================================
// TESTS
// =============================================================================
