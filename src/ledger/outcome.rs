//! Verification Outcomes
//!
//! Transient result of one reconciliation pass, consumed by the ledger to
//! drive a state transition.

use serde::{Deserialize, Serialize};

use crate::core::time::Timestamp;
use crate::oracle::attestation::AttestationRef;

/// What one reconciliation pass concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Observed balance covers the committed amount and the proof is valid.
    Confirmed,
    /// Observed balance is below the committed amount.
    InsufficientBalance,
    /// Oracle could not produce a usable observation this pass.
    OracleUnavailable,
    /// Stored proof failed re-validation.
    ProofInvalid,
}

impl Decision {
    /// Every decision.
    pub const ALL: [Decision; 4] = [
        Decision::Confirmed,
        Decision::InsufficientBalance,
        Decision::OracleUnavailable,
        Decision::ProofInvalid,
    ];
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// Decision reached.
    pub decision: Decision,
    /// Balance the oracle reported, if it answered.
    pub observed_balance: Option<u64>,
    /// Committed amount.
    pub required_balance: u64,
    /// Oracle feed calls made (0 on a cache hit).
    pub attempt_count: u32,
    /// When the pass concluded.
    pub evaluated_at: Timestamp,
    /// Attestation the decision rests on.
    pub attestation: Option<AttestationRef>,
}

impl VerificationOutcome {
    /// Decision from an observed balance.
    pub fn from_balance(
        observed: u64,
        required: u64,
        attempt_count: u32,
        evaluated_at: Timestamp,
        attestation: AttestationRef,
    ) -> Self {
        let decision = if observed < required {
            Decision::InsufficientBalance
        } else {
            Decision::Confirmed
        };
        Self {
            decision,
            observed_balance: Some(observed),
            required_balance: required,
            attempt_count,
            evaluated_at,
            attestation: Some(attestation),
        }
    }

    /// Oracle failed this pass.
    pub fn oracle_unavailable(required: u64, attempt_count: u32, evaluated_at: Timestamp) -> Self {
        Self {
            decision: Decision::OracleUnavailable,
            observed_balance: None,
            required_balance: required,
            attempt_count,
            evaluated_at,
            attestation: None,
        }
    }

    /// Stored proof failed re-validation.
    pub fn proof_invalid(
        required: u64,
        attempt_count: u32,
        evaluated_at: Timestamp,
        attestation: Option<AttestationRef>,
    ) -> Self {
        Self {
            decision: Decision::ProofInvalid,
            observed_balance: None,
            required_balance: required,
            attempt_count,
            evaluated_at,
            attestation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> AttestationRef {
        AttestationRef {
            hash: [0u8; 32],
            observed_at: 1,
            source_id: "test".into(),
        }
    }

    #[test]
    fn test_balance_comparison() {
        let equal = VerificationOutcome::from_balance(100, 100, 1, 5, reference());
        assert_eq!(equal.decision, Decision::Confirmed);

        let short = VerificationOutcome::from_balance(99, 100, 1, 5, reference());
        assert_eq!(short.decision, Decision::InsufficientBalance);
        assert_eq!(short.observed_balance, Some(99));
    }

    #[test]
    fn test_unavailable_has_no_observation() {
        let outcome = VerificationOutcome::oracle_unavailable(100, 5, 9);
        assert_eq!(outcome.decision, Decision::OracleUnavailable);
        assert_eq!(outcome.observed_balance, None);
        assert!(outcome.attestation.is_none());
    }
}
