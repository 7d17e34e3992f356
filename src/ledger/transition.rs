//! Commitment State Machine
//!
//! Pure transition table. No I/O, no clock reads: the caller passes the
//! evaluation time inside the outcome.
//!
//! ```text
//!                  Confirmed
//!   Provisional ───────────────▶ Verified ◀──────┐
//!        │ ▲                    │    │ ▲         │ Confirmed
//!        │ └─ OracleUnavailable │    │ └─ Confirmed (refresh)
//!        │                      │    ▼           │
//!        │        OracleUnavailable  Degraded ───┘
//!        │                               │  OracleUnavailable
//!        │                               │  (within grace: stay)
//!        ▼                               ▼
//!     Revoked ◀── InsufficientBalance / ProofInvalid / grace expired
//! ```

use std::fmt;

use crate::core::time::Timestamp;
use crate::ledger::commitment::{CommitmentState, RevokeReason, Revision};
use crate::ledger::outcome::{Decision, VerificationOutcome};

/// State after applying an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Next {
    /// New state.
    pub state: CommitmentState,
    /// Start of the current degraded streak.
    pub degraded_since: Option<Timestamp>,
    /// Set when `state` is `Revoked`.
    pub revoke_reason: Option<RevokeReason>,
}

/// Why the ledger refused an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRejection {
    /// Caller's expected revision is not the current one.
    StaleRevision {
        /// What the caller expected.
        expected: Revision,
        /// What the ledger holds.
        actual: Revision,
    },
    /// The table has no edge for this state and decision.
    NotAllowed {
        /// Current state.
        from: CommitmentState,
        /// Decision requested.
        decision: Decision,
    },
    /// The outcome's balance figures contradict its decision.
    InconsistentOutcome {
        /// Decision requested.
        decision: Decision,
        /// Observed balance carried.
        observed: Option<u64>,
        /// Required balance carried.
        required: u64,
    },
}

impl fmt::Display for TransitionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleRevision { expected, actual } => {
                write!(f, "expected revision {}, ledger holds {}", expected, actual)
            }
            Self::NotAllowed { from, decision } => {
                write!(f, "no transition from {} on {:?}", from, decision)
            }
            Self::InconsistentOutcome { decision, observed, required } => write!(
                f,
                "{:?} with observed {:?} and required {} is contradictory",
                decision, observed, required
            ),
        }
    }
}

/// Apply `outcome` to a commitment in `state`.
///
/// `degraded_since` is the start of the current degraded streak, if any.
/// A `Degraded` commitment that sees another `OracleUnavailable` more than
/// `grace_secs` after the streak started is revoked. Exactly `grace_secs`
/// is still within grace.
pub fn transition(
    state: CommitmentState,
    degraded_since: Option<Timestamp>,
    outcome: &VerificationOutcome,
    grace_secs: u64,
) -> Result<Next, TransitionRejection> {
    use crate::ledger::commitment::CommitmentState::*;

    let decision = outcome.decision;
    if state == Revoked {
        return Err(TransitionRejection::NotAllowed { from: state, decision });
    }

    let inconsistent = || TransitionRejection::InconsistentOutcome {
        decision,
        observed: outcome.observed_balance,
        required: outcome.required_balance,
    };

    let next = match decision {
        Decision::Confirmed => {
            let observed = outcome.observed_balance.ok_or_else(inconsistent)?;
            if observed < outcome.required_balance {
                return Err(inconsistent());
            }
            Next {
                state: Verified,
                degraded_since: None,
                revoke_reason: None,
            }
        }
        Decision::InsufficientBalance => {
            let observed = outcome.observed_balance.ok_or_else(inconsistent)?;
            if observed >= outcome.required_balance {
                return Err(inconsistent());
            }
            revoked(RevokeReason::InsufficientBalance {
                observed,
                required: outcome.required_balance,
            })
        }
        Decision::ProofInvalid => revoked(RevokeReason::ProofInvalid),
        Decision::OracleUnavailable => match state {
            Provisional => Next {
                state: Provisional,
                degraded_since: None,
                revoke_reason: None,
            },
            Verified => Next {
                state: Degraded,
                degraded_since: Some(outcome.evaluated_at),
                revoke_reason: None,
            },
            Degraded => {
                let since = degraded_since.unwrap_or(outcome.evaluated_at);
                if outcome.evaluated_at.saturating_sub(since) > grace_secs {
                    revoked(RevokeReason::GraceExpired { degraded_since: since })
                } else {
                    Next {
                        state: Degraded,
                        degraded_since: Some(since),
                        revoke_reason: None,
                    }
                }
            }
            Revoked => return Err(TransitionRejection::NotAllowed { from: state, decision }),
        },
    };

    Ok(next)
}

fn revoked(reason: RevokeReason) -> Next {
    Next {
        state: CommitmentState::Revoked,
        degraded_since: None,
        revoke_reason: Some(reason),
    }
}

// =============================================================================
// TESTS
// =============================================================================
