//! Commitment Records
//!
//! A commitment is one user's on-record claim of holding a BTC amount at an
//! address, without transferring custody. Records are never deleted; a
//! revoked commitment stays in the ledger for audit.

use std::fmt;

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::time::Timestamp;
use crate::ledger::outcome::Decision;
use crate::oracle::attestation::AttestationRef;
use crate::proof::validator::CommitmentClaim;

/// Unique commitment identifier (random UUID bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitmentId(pub [u8; 16]);

impl CommitmentId {
    /// Fresh random id.
    pub fn new_random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Raw bytes (storage key).
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Rebuild from a storage key.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes).ok().map(Self)
    }
}

impl fmt::Display for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl fmt::Debug for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitmentId({})", self)
    }
}

/// Commitment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitmentState {
    /// Submitted, awaiting first reconciliation.
    Provisional,
    /// Backed by a recent on-chain observation.
    Verified,
    /// Oracle could not confirm; eligibility suspended.
    Degraded,
    /// Terminal. A new commitment is required.
    Revoked,
}

impl CommitmentState {
    /// Every state, in lifecycle order.
    pub const ALL: [CommitmentState; 4] = [
        CommitmentState::Provisional,
        CommitmentState::Verified,
        CommitmentState::Degraded,
        CommitmentState::Revoked,
    ];

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        self == CommitmentState::Revoked
    }

    /// Reward eligibility implied by this state.
    pub fn eligibility(self) -> Eligibility {
        match self {
            CommitmentState::Provisional => Eligibility::Pending,
            CommitmentState::Verified => Eligibility::Eligible,
            CommitmentState::Degraded => Eligibility::Suspended,
            CommitmentState::Revoked => Eligibility::Ineligible,
        }
    }
}

impl fmt::Display for CommitmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitmentState::Provisional => "provisional",
            CommitmentState::Verified => "verified",
            CommitmentState::Degraded => "degraded",
            CommitmentState::Revoked => "revoked",
        };
        f.write_str(name)
    }
}

/// Reward eligibility as seen by downstream consumers.
///
/// `Suspended` (temporarily unverifiable) and `Ineligible` (revoked) are
/// distinct so consumers cannot conflate infrastructure trouble with a
/// user-caused revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eligibility {
    /// Not yet verified.
    Pending,
    /// Earning rewards.
    Eligible,
    /// Oracle trouble; rewards paused.
    Suspended,
    /// Revoked.
    Ineligible,
}

/// Why a commitment was revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokeReason {
    /// On-chain balance dropped below the committed amount.
    InsufficientBalance {
        /// Balance the oracle reported.
        observed: u64,
        /// Committed amount.
        required: u64,
    },
    /// Stored proof no longer validates.
    ProofInvalid,
    /// Degraded for longer than the grace period.
    GraceExpired {
        /// When the commitment entered `Degraded`.
        degraded_since: Timestamp,
    },
}

/// One state-changing reconciliation, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Attestation that drove the change, if the oracle answered.
    pub attestation: Option<AttestationRef>,
    /// When the change was applied.
    pub recorded_at: Timestamp,
    /// State before.
    pub from: CommitmentState,
    /// State after.
    pub to: CommitmentState,
    /// Reconciliation decision.
    pub decision: Decision,
}

/// A commitment as submitted, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommitment {
    /// Claimant identity.
    pub owner: PublicKey,
    /// Committed address.
    pub btc_address: String,
    /// Committed amount.
    pub amount_satoshis: u64,
    /// Proof bytes as submitted.
    pub proof: Vec<u8>,
    /// Timestamp embedded in the proof.
    pub signed_at: Timestamp,
    /// Nonce embedded in the proof.
    pub nonce: u64,
}

/// Expected prior state for an `apply_outcome` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// State the caller observed.
    pub state: CommitmentState,
    /// Version the caller observed.
    pub version: u64,
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.state, self.version)
    }
}

/// Ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Unique id.
    pub id: CommitmentId,
    /// Insertion order, used as a tie-breaker when scheduling.
    pub sequence: u64,
    /// Claimant identity.
    pub owner: PublicKey,
    /// Committed address.
    pub btc_address: String,
    /// Committed amount.
    pub amount_satoshis: u64,
    /// Proof bytes as submitted.
    pub proof: Vec<u8>,
    /// Timestamp embedded in the proof.
    pub signed_at: Timestamp,
    /// Nonce embedded in the proof.
    pub nonce: u64,
    /// Insertion time.
    pub created_at: Timestamp,
    /// Last reconciliation that confirmed the balance.
    pub last_verified_at: Option<Timestamp>,
    /// Last reconciliation applied, whatever its decision.
    pub last_checked_at: Option<Timestamp>,
    /// Current state.
    pub state: CommitmentState,
    /// Bumped on every applied outcome.
    pub version: u64,
    /// When the current `Degraded` streak started.
    pub degraded_since: Option<Timestamp>,
    /// Most recent oracle balance.
    pub last_observed_balance: Option<u64>,
    /// Set once revoked.
    pub revoke_reason: Option<RevokeReason>,
    /// State changes, oldest first.
    pub audit: Vec<AuditEntry>,
}

impl Commitment {
    /// Build a fresh `Provisional` record.
    pub fn provisional(id: CommitmentId, sequence: u64, new: NewCommitment, now: Timestamp) -> Self {
        Self {
            id,
            sequence,
            owner: new.owner,
            btc_address: new.btc_address,
            amount_satoshis: new.amount_satoshis,
            proof: new.proof,
            signed_at: new.signed_at,
            nonce: new.nonce,
            created_at: now,
            last_verified_at: None,
            last_checked_at: None,
            state: CommitmentState::Provisional,
            version: 0,
            degraded_since: None,
            last_observed_balance: None,
            revoke_reason: None,
            audit: Vec::new(),
        }
    }

    /// Current revision, to pass back into `apply_outcome`.
    pub fn revision(&self) -> Revision {
        Revision {
            state: self.state,
            version: self.version,
        }
    }

    /// The proof-relevant fields.
    pub fn claim(&self) -> CommitmentClaim<'_> {
        CommitmentClaim {
            owner: &self.owner,
            btc_address: &self.btc_address,
            amount_satoshis: self.amount_satoshis,
        }
    }

    /// Reward eligibility.
    pub fn eligibility(&self) -> Eligibility {
        self.state.eligibility()
    }

    /// Start of the current wait for reconciliation, used for oldest-first
    /// scheduling.
    pub fn staleness_anchor(&self) -> Timestamp {
        self.last_checked_at.unwrap_or(self.created_at)
    }

    /// Index key for `(owner, btc_address)`.
    pub fn lineage_key(&self) -> LineageKey {
        lineage_key(&self.owner, &self.btc_address)
    }
}

/// `(owner, btc_address)` key grouping successive commitments.
pub type LineageKey = ([u8; 33], String);

/// Build the lineage key.
pub fn lineage_key(owner: &PublicKey, btc_address: &str) -> LineageKey {
    (owner.serialize(), btc_address.to_string())
}
