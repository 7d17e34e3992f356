//! Commitment Ledger
//!
//! Durable, append-friendly record of every commitment and its state.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  COMMITMENT LEDGER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  commitment.rs - Records, ids, states, eligibility          │
//! │  outcome.rs    - Reconciliation outcomes                    │
//! │  transition.rs - Pure state transition table                │
//! │  store.rs      - sled persistence                           │
//! │  registry.rs   - Row-locked ledger, due-list, lineages      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod outcome;
pub mod registry;
pub mod store;
pub mod transition;

// Re-export key types
pub use commitment::{
    AuditEntry, Commitment, CommitmentId, CommitmentState, Eligibility, NewCommitment, RevokeReason, Revision,
};
pub use outcome::{Decision, VerificationOutcome};
pub use registry::{AppliedTransition, CommitmentLedger, LedgerConfig, LedgerError};
pub use store::{LedgerStore, StoreError};
pub use transition::{transition, Next, TransitionRejection};
