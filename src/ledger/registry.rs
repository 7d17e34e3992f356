//! Commitment Ledger
//!
//! Authoritative store of commitment records. Many readers, and writes are
//! serialized per commitment id by a row lock.
//!
//! ## Locking
//!
//! ```text
//! lineages (RwLock) ──▶ rows (RwLock) ──▶ row (Mutex)
//! ```
//!
//! Locks are only ever taken in that order. A transition is computed on a
//! copy of the record, persisted, and only then swapped in under the row
//! lock, so readers see either the old or the new record.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use secp256k1::PublicKey;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{env_or, ConfigError};
use crate::core::time::Timestamp;
use crate::ledger::commitment::{
    lineage_key, AuditEntry, Commitment, CommitmentId, CommitmentState, LineageKey, NewCommitment, Revision,
};
use crate::ledger::outcome::{Decision, VerificationOutcome};
use crate::ledger::store::{LedgerStore, StoreError};
use crate::ledger::transition::{transition, TransitionRejection};

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// `(owner, btc_address)` already has a non-revoked commitment.
    #[error("commitment {existing} is still active for this owner and address")]
    DuplicateCommitment {
        /// The active commitment.
        existing: CommitmentId,
    },
    /// No commitment with this id.
    #[error("commitment {0} not found")]
    NotFound(CommitmentId),
    /// Outcome rejected by the state machine.
    #[error("invalid transition for {id}: {reason}")]
    InvalidTransition {
        /// Target commitment.
        id: CommitmentId,
        /// Why it was rejected.
        reason: TransitionRejection,
    },
    /// Persistence failed; in-memory state is unchanged.
    #[error("ledger storage: {0}")]
    Storage(#[from] StoreError),
}

/// Ledger configuration.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Database directory.
    pub path: PathBuf,
    /// Use a throwaway in-memory database instead of `path`.
    pub temporary: bool,
    /// How long a commitment may stay `Degraded` before revocation.
    pub degraded_grace_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/ledger"),
            temporary: false,
            degraded_grace_secs: 24 * 60 * 60,
        }
    }
}

impl LedgerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            path: env_or("COMMIT_LEDGER_PATH", defaults.path)?,
            temporary: false,
            degraded_grace_secs: env_or("COMMIT_GRACE_SECS", defaults.degraded_grace_secs)?,
        })
    }

    /// In-memory ledger, for tests and dry runs.
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Self::default()
        }
    }
}

/// A transition the ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    /// Commitment id.
    pub id: CommitmentId,
    /// Committed address.
    pub btc_address: String,
    /// State before.
    pub old_state: CommitmentState,
    /// State after.
    pub new_state: CommitmentState,
    /// Revision after; pass it to the next `apply_outcome`.
    pub revision: Revision,
    /// Decision that drove it.
    pub decision: Decision,
    /// When it was applied.
    pub at: Timestamp,
}

impl AppliedTransition {
    /// Whether the state actually changed.
    pub fn changed(&self) -> bool {
        self.old_state != self.new_state
    }
}

type Row = Arc<Mutex<Commitment>>;

/// The commitment ledger.
pub struct CommitmentLedger {
    config: LedgerConfig,
    store: LedgerStore,
    rows: RwLock<BTreeMap<CommitmentId, Row>>,
    lineages: RwLock<BTreeMap<LineageKey, Vec<CommitmentId>>>,
    next_sequence: AtomicU64,
}

impl CommitmentLedger {
    /// Open the ledger and load every stored record.
    pub fn open(config: LedgerConfig) -> Result<Self, LedgerError> {
        let store = if config.temporary {
            LedgerStore::temporary()?
        } else {
            LedgerStore::open(&config.path)?
        };

        let mut records = store.load_all()?;
        records.sort_by_key(|c| c.sequence);

        let mut rows = BTreeMap::new();
        let mut lineages: BTreeMap<LineageKey, Vec<CommitmentId>> = BTreeMap::new();
        let next_sequence = records.last().map_or(0, |c| c.sequence + 1);

        for record in records {
            lineages.entry(record.lineage_key()).or_default().push(record.id);
            rows.insert(record.id, Arc::new(Mutex::new(record)));
        }

        info!(
            commitments = rows.len(),
            lineages = lineages.len(),
            temporary = config.temporary,
            "commitment ledger opened"
        );

        Ok(Self {
            config,
            store,
            rows: RwLock::new(rows),
            lineages: RwLock::new(lineages),
            next_sequence: AtomicU64::new(next_sequence),
        })
    }

    /// Ledger configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Insert a new `Provisional` commitment.
    ///
    /// Fails with `DuplicateCommitment` while the latest commitment for the
    /// same `(owner, btc_address)` is not revoked.
    pub async fn insert_provisional(&self, new: NewCommitment, now: Timestamp) -> Result<CommitmentId, LedgerError> {
        let key = lineage_key(&new.owner, &new.btc_address);
        let mut lineages = self.lineages.write().await;

        if let Some(&latest) = lineages.get(&key).and_then(|ids| ids.last()) {
            if let Some(row) = self.row(latest).await {
                if row.lock().await.state != CommitmentState::Revoked {
                    return Err(LedgerError::DuplicateCommitment { existing: latest });
                }
            }
        }

        let id = CommitmentId::new_random();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let commitment = self.store.persist(Commitment::provisional(id, sequence, new, now)).await?;

        info!(
            commitment_id = %id,
            address = %commitment.btc_address,
            amount_sats = commitment.amount_satoshis,
            "provisional commitment recorded"
        );

        self.rows.write().await.insert(id, Arc::new(Mutex::new(commitment)));
        lineages.entry(key).or_default().push(id);
        Ok(id)
    }

    /// Snapshot of one commitment.
    pub async fn get(&self, id: CommitmentId) -> Option<Commitment> {
        let row = self.row(id).await?;
        let commitment = row.lock().await;
        Some(commitment.clone())
    }

    /// Most recent commitment for `(owner, btc_address)`: the active one if
    /// any, otherwise the latest revoked one.
    pub async fn latest_for(&self, owner: &PublicKey, btc_address: &str) -> Option<Commitment> {
        let latest = {
            let lineages = self.lineages.read().await;
            *lineages.get(&lineage_key(owner, btc_address))?.last()?
        };
        self.get(latest).await
    }

    /// Every commitment ever made for `(owner, btc_address)`, oldest first.
    pub async fn history(&self, owner: &PublicKey, btc_address: &str) -> Vec<Commitment> {
        let ids = {
            let lineages = self.lineages.read().await;
            lineages.get(&lineage_key(owner, btc_address)).cloned().unwrap_or_default()
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(commitment) = self.get(id).await {
                out.push(commitment);
            }
        }
        out
    }

    /// Apply a reconciliation outcome. The only mutation path.
    ///
    /// `expected` must be the commitment's current revision; anything else
    /// (a slow pass overtaken by a newer one, or a repeat of an applied
    /// outcome) is rejected as `InvalidTransition`.
    pub async fn apply_outcome(
        &self,
        id: CommitmentId,
        expected: Revision,
        outcome: &VerificationOutcome,
    ) -> Result<AppliedTransition, LedgerError> {
        let row = self.row(id).await.ok_or(LedgerError::NotFound(id))?;
        let mut current = row.lock().await;

        let actual = current.revision();
        if actual != expected {
            warn!(commitment_id = %id, %expected, %actual, "outcome rejected: stale revision");
            return Err(LedgerError::InvalidTransition {
                id,
                reason: TransitionRejection::StaleRevision { expected, actual },
            });
        }

        let next = transition(current.state, current.degraded_since, outcome, self.config.degraded_grace_secs)
            .map_err(|reason| {
                warn!(commitment_id = %id, %reason, "outcome rejected");
                LedgerError::InvalidTransition { id, reason }
            })?;

        let at = outcome.evaluated_at;
        let mut updated = current.clone();
        updated.state = next.state;
        updated.version += 1;
        updated.degraded_since = next.degraded_since;
        updated.last_checked_at = Some(at);
        if outcome.decision == Decision::Confirmed {
            updated.last_verified_at = Some(at);
        }
        if outcome.observed_balance.is_some() {
            updated.last_observed_balance = outcome.observed_balance;
        }
        if next.revoke_reason.is_some() {
            updated.revoke_reason = next.revoke_reason;
        }
        if updated.state != current.state {
            updated.audit.push(AuditEntry {
                attestation: outcome.attestation.clone(),
                recorded_at: at,
                from: current.state,
                to: updated.state,
                decision: outcome.decision,
            });
        }

        let updated = self.store.persist(updated).await?;

        let applied = AppliedTransition {
            id,
            btc_address: updated.btc_address.clone(),
            old_state: current.state,
            new_state: updated.state,
            revision: updated.revision(),
            decision: outcome.decision,
            at,
        };
        *current = updated;

        if applied.changed() {
            info!(
                commitment_id = %id,
                from = %applied.old_state,
                to = %applied.new_state,
                decision = ?applied.decision,
                "commitment state changed"
            );
        } else {
            debug!(commitment_id = %id, state = %applied.new_state, decision = ?applied.decision, "commitment refreshed");
        }

        Ok(applied)
    }

    /// Commitments due for reconciliation at `now`, most overdue first.
    ///
    /// Due = not revoked, and never checked or last checked at least
    /// `interval_secs` ago.
    pub async fn list_due_for_verification(&self, now: Timestamp, interval_secs: u64) -> Vec<CommitmentId> {
        let rows: Vec<Row> = self.rows.read().await.values().cloned().collect();

        let mut due = Vec::new();
        for row in rows {
            let commitment = row.lock().await;
            if commitment.state.is_terminal() {
                continue;
            }
            let is_due = match commitment.last_checked_at {
                None => true,
                Some(checked) => checked.saturating_add(interval_secs) <= now,
            };
            if is_due {
                due.push((commitment.staleness_anchor(), commitment.sequence, commitment.id));
            }
        }

        due.sort_unstable();
        due.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Number of commitments, revoked included.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the ledger is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Commitment count per state.
    pub async fn state_counts(&self) -> BTreeMap<String, usize> {
        let rows: Vec<Row> = self.rows.read().await.values().cloned().collect();
        let mut counts = BTreeMap::new();
        for row in rows {
            let state = row.lock().await.state;
            *counts.entry(state.to_string()).or_insert(0) += 1;
        }
        counts
    }

    async fn row(&self, id: CommitmentId) -> Option<Row> {
        self.rows.read().await.get(&id).cloned()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::attestation::AttestationRef;
    use secp256k1::{SecretKey, SECP256K1};

    const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
    const ONE_BTC: u64 = 100_000_000;

    fn owner(seed: u8) -> PublicKey {
        let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
        PublicKey::from_secret_key(SECP256K1, &secret)
    }

    fn new_commitment(seed: u8) -> NewCommitment {
        NewCommitment {
            owner: owner(seed),
            btc_address: ADDRESS.into(),
            amount_satoshis: ONE_BTC,
            proof: vec![0u8; 80],
            signed_at: 0,
            nonce: 0,
        }
    }

    fn reference(at: Timestamp) -> AttestationRef {
        AttestationRef {
            hash: [1u8; 32],
            observed_at: at,
            source_id: "test".into(),
        }
    }

    fn confirmed(at: Timestamp) -> VerificationOutcome {
        VerificationOutcome::from_balance(ONE_BTC, ONE_BTC, 1, at, reference(at))
    }

    fn ledger() -> CommitmentLedger {
        CommitmentLedger::open(LedgerConfig::temporary()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let ledger = ledger();
        let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();

        let commitment = ledger.get(id).await.unwrap();
        assert_eq!(commitment.state, CommitmentState::Provisional);
        assert_eq!(commitment.created_at, 100);
        assert_eq!(ledger.latest_for(&owner(1), ADDRESS).await.unwrap().id, id);
        assert!(ledger.get(CommitmentId::new_random()).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_until_revoked() {
        let ledger = ledger();
        let first = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();

        let err = ledger.insert_provisional(new_commitment(1), 101).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateCommitment { existing } if existing == first));

        // Another owner on the same address is a separate lineage.
        ledger.insert_provisional(new_commitment(2), 101).await.unwrap();

        let revision = ledger.get(first).await.unwrap().revision();
        let revoke = VerificationOutcome::proof_invalid(ONE_BTC, 1, 102, None);
        ledger.apply_outcome(first, revision, &revoke).await.unwrap();

        let second = ledger.insert_provisional(new_commitment(1), 103).await.unwrap();
        let history = ledger.history(&owner(1), ADDRESS).await;
        assert_eq!(history.iter().map(|c| c.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(ledger.latest_for(&owner(1), ADDRESS).await.unwrap().id, second);
    }

    #[tokio::test]
    async fn test_apply_twice_rejected() {
        let ledger = ledger();
        let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();
        let expected = ledger.get(id).await.unwrap().revision();

        let applied = ledger.apply_outcome(id, expected, &confirmed(160)).await.unwrap();
        assert_eq!(applied.new_state, CommitmentState::Verified);
        assert!(applied.changed());

        let err = ledger.apply_outcome(id, expected, &confirmed(160)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition { reason: TransitionRejection::StaleRevision { .. }, .. }
        ));
        assert_eq!(ledger.get(id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_cannot_regress_revocation() {
        let ledger = ledger();
        let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();
        let verified = ledger
            .apply_outcome(id, ledger.get(id).await.unwrap().revision(), &confirmed(160))
            .await
            .unwrap()
            .revision;

        // Two passes both observed `verified`; the revoking one lands first.
        let short = VerificationOutcome::from_balance(ONE_BTC / 2, ONE_BTC, 1, 220, reference(220));
        ledger.apply_outcome(id, verified, &short).await.unwrap();
        let late = ledger.apply_outcome(id, verified, &confirmed(221)).await;

        assert!(matches!(late, Err(LedgerError::InvalidTransition { .. })));
        assert_eq!(ledger.get(id).await.unwrap().state, CommitmentState::Revoked);
    }

    #[tokio::test]
    async fn test_revoked_rejects_even_with_current_revision() {
        let ledger = ledger();
        let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();
        let revoke = VerificationOutcome::proof_invalid(ONE_BTC, 1, 101, None);
        let revision = ledger
            .apply_outcome(id, ledger.get(id).await.unwrap().revision(), &revoke)
            .await
            .unwrap()
            .revision;

        let err = ledger.apply_outcome(id, revision, &confirmed(102)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition { reason: TransitionRejection::NotAllowed { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn test_audit_trail_records_state_changes_only() {
        let ledger = ledger();
        let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();

        let mut revision = ledger.get(id).await.unwrap().revision();
        for at in [160, 220, 280] {
            revision = ledger.apply_outcome(id, revision, &confirmed(at)).await.unwrap().revision;
        }

        let commitment = ledger.get(id).await.unwrap();
        assert_eq!(commitment.version, 3);
        assert_eq!(commitment.last_verified_at, Some(280));
        assert_eq!(commitment.audit.len(), 1);
        assert_eq!(commitment.audit[0].attestation, Some(reference(160)));
    }

    #[tokio::test]
    async fn test_due_list_oldest_first() {
        let ledger = ledger();
        let a = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();
        let b = ledger.insert_provisional(new_commitment(2), 100).await.unwrap();
        let c = ledger.insert_provisional(new_commitment(3), 50).await.unwrap();

        // Never checked: all due, oldest creation first, insertion order on ties.
        assert_eq!(ledger.list_due_for_verification(100, 60).await, vec![c, a, b]);

        let rev = ledger.get(c).await.unwrap().revision();
        ledger.apply_outcome(c, rev, &confirmed(110)).await.unwrap();
        let rev = ledger.get(a).await.unwrap().revision();
        ledger.apply_outcome(a, rev, &confirmed(105)).await.unwrap();

        assert_eq!(ledger.list_due_for_verification(120, 60).await, vec![b]);
        assert_eq!(ledger.list_due_for_verification(170, 60).await, vec![b, a, c]);
    }

    #[tokio::test]
    async fn test_revoked_never_due() {
        let ledger = ledger();
        let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();
        let rev = ledger.get(id).await.unwrap().revision();
        ledger
            .apply_outcome(id, rev, &VerificationOutcome::proof_invalid(ONE_BTC, 1, 101, None))
            .await
            .unwrap();

        assert!(ledger.list_due_for_verification(1_000_000, 60).await.is_empty());
        assert_eq!(ledger.state_counts().await.get("revoked"), Some(&1));
    }

    #[tokio::test]
    async fn test_reopen_restores_state_and_lineages() {
        let dir = std::env::temp_dir().join(format!("commit-ledger-{}", CommitmentId::new_random()));
        let config = LedgerConfig {
            path: dir.clone(),
            ..LedgerConfig::default()
        };

        let id = {
            let ledger = CommitmentLedger::open(config.clone()).unwrap();
            let id = ledger.insert_provisional(new_commitment(1), 100).await.unwrap();
            let rev = ledger.get(id).await.unwrap().revision();
            ledger.apply_outcome(id, rev, &confirmed(160)).await.unwrap();
            id
        };

        let ledger = CommitmentLedger::open(config).unwrap();
        let commitment = ledger.get(id).await.unwrap();
        assert_eq!(commitment.state, CommitmentState::Verified);
        assert_eq!(commitment.version, 1);
        assert!(matches!(
            ledger.insert_provisional(new_commitment(1), 200).await,
            Err(LedgerError::DuplicateCommitment { .. })
        ));

        let next = ledger.insert_provisional(new_commitment(2), 200).await.unwrap();
        assert_eq!(ledger.get(next).await.unwrap().sequence, 1);

        drop(ledger);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
