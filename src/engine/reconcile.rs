//! Reconciliation Pass
//!
//! One pass for one commitment:
//!
//! 1. Fetch the balance attestation (oracle retries are internal to the client).
//! 2. Any oracle error → `OracleUnavailable`.
//! 3. Re-validate the stored proof → `ProofInvalid` on failure.
//! 4. Compare observed balance to the committed amount →
//!    `InsufficientBalance` or `Confirmed`.
//! 5. Apply the outcome to the ledger against the revision read in step 0.
//!
//! The engine never retries on top of the oracle client; a failed pass is
//! simply picked up again at the next due time.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::time::Clock;
use crate::engine::events::{CommitmentStateChanged, EventBus};
use crate::ledger::commitment::{Commitment, CommitmentId};
use crate::ledger::outcome::VerificationOutcome;
use crate::ledger::registry::{AppliedTransition, CommitmentLedger, LedgerError};
use crate::oracle::attestation::Freshness;
use crate::oracle::client::{OracleClient, ServedAttestation};
use crate::proof::validator::{ProofError, ProofValidator};

/// Runs reconciliation passes.
pub struct Reconciler {
    ledger: Arc<CommitmentLedger>,
    oracle: Arc<OracleClient>,
    validator: ProofValidator,
    clock: Arc<dyn Clock>,
    events: EventBus,
    pass_deadline: Duration,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        ledger: Arc<CommitmentLedger>,
        oracle: Arc<OracleClient>,
        validator: ProofValidator,
        clock: Arc<dyn Clock>,
        events: EventBus,
        pass_deadline: Duration,
    ) -> Self {
        Self {
            ledger,
            oracle,
            validator,
            clock,
            events,
            pass_deadline,
        }
    }

    /// The oracle client passes go through.
    pub fn oracle(&self) -> &Arc<OracleClient> {
        &self.oracle
    }

    /// Reconcile one commitment.
    ///
    /// Returns `None` if the commitment is already revoked.
    #[instrument(skip(self), fields(commitment_id = %id))]
    pub async fn reconcile(&self, id: CommitmentId) -> Result<Option<AppliedTransition>, LedgerError> {
        let snapshot = self.ledger.get(id).await.ok_or(LedgerError::NotFound(id))?;
        if snapshot.state.is_terminal() {
            return Ok(None);
        }
        let expected = snapshot.revision();

        let outcome = self.evaluate(&snapshot).await;
        debug!(
            decision = ?outcome.decision,
            observed = ?outcome.observed_balance,
            required = outcome.required_balance,
            attempts = outcome.attempt_count,
            "reconciliation evaluated"
        );

        let applied = self.ledger.apply_outcome(id, expected, &outcome).await?;
        if let Some(event) = CommitmentStateChanged::from_applied(&applied) {
            self.events.publish(event);
        }
        Ok(Some(applied))
    }

    /// Steps 1 to 4 of a pass. Never fails: every path ends in a decision.
    pub async fn evaluate(&self, commitment: &Commitment) -> VerificationOutcome {
        let required = commitment.amount_satoshis;
        let fetched = tokio::time::timeout(self.pass_deadline, self.oracle.fetch_balance(&commitment.btc_address)).await;

        let served = match fetched {
            Ok(Ok(served)) => served,
            Ok(Err(err)) => {
                warn!(address = %commitment.btc_address, error = %err, "oracle unavailable for this pass");
                return VerificationOutcome::oracle_unavailable(required, err.attempts(), self.clock.now());
            }
            Err(_) => {
                warn!(address = %commitment.btc_address, deadline = ?self.pass_deadline, "reconciliation deadline exceeded");
                let attempts = self.oracle.config().retry.max_attempts;
                return VerificationOutcome::oracle_unavailable(required, attempts, self.clock.now());
            }
        };

        let now = self.clock.now();
        let ServedAttestation {
            attestation,
            freshness,
            attempts,
        } = served;

        if let Freshness::Stale { age_secs } = freshness {
            warn!(address = %commitment.btc_address, age_secs, "deciding on stale attestation");
        }

        if let Err(err) = self.check_stored_proof(commitment) {
            warn!(commitment_id = %commitment.id, error = %err, "stored proof failed re-validation");
            return VerificationOutcome::proof_invalid(required, attempts, now, Some(attestation.reference()));
        }

        VerificationOutcome::from_balance(
            attestation.balance_satoshis,
            required,
            attempts,
            now,
            attestation.reference(),
        )
    }

    fn check_stored_proof(&self, commitment: &Commitment) -> Result<(), ProofError> {
        let envelope = self
            .validator
            .revalidate(&commitment.claim(), &commitment.proof, &commitment.owner)?;
        if envelope.signed_at != commitment.signed_at || envelope.nonce != commitment.nonce {
            return Err(ProofError::SignatureMismatch);
        }
        Ok(())
    }
}
