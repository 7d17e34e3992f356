//! # BTC Commitment Verifier
//!
//! Non-custodial Bitcoin commitment verification and reward eligibility.
//! Users commit to holding BTC at an address without transferring custody;
//! the verifier proves the claim is authentic, keeps checking it against an
//! oracle, and drives each commitment through its eligibility state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 BTC COMMITMENT VERIFIER                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                               │
//! │  ├── hash.rs     - Domain-separated SHA-256                 │
//! │  ├── time.rs     - Injected clock                           │
//! │  └── amount.rs   - Checked satoshi / USD arithmetic         │
//! │                                                             │
//! │  proof/          - Proof Validator (stateless)              │
//! │  ├── message.rs  - Canonical message, envelope, signer      │
//! │  ├── validator.rs- Signature, address, freshness checks     │
//! │  └── merkle.rs   - UTXO snapshot inclusion proofs           │
//! │                                                             │
//! │  oracle/         - Oracle Client                            │
//! │  ├── feed.rs     - Feed capability (HTTP, scripted)         │
//! │  ├── cache.rs    - Injected TTL cache                       │
//! │  └── client.rs   - Dedup, retry/backoff, staleness band     │
//! │                                                             │
//! │  ledger/         - Commitment Ledger                        │
//! │  ├── transition.rs - State machine table                    │
//! │  ├── store.rs    - sled persistence                         │
//! │  └── registry.rs - Row-locked ledger                        │
//! │                                                             │
//! │  engine/         - Verification Engine                      │
//! │  ├── scheduler.rs- Tick loop, bounded workers               │
//! │  ├── reconcile.rs- One reconciliation pass                  │
//! │  ├── events.rs   - State change stream                      │
//! │  └── service.rs  - Submission API and queries               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## State Machine
//!
//! ```text
//! Provisional ──▶ Verified ◀──▶ Degraded
//!      │              │             │
//!      └──────────────┴─────────────┴──▶ Revoked (terminal)
//! ```
//!
//! Every transition goes through
//! [`CommitmentLedger::apply_outcome`](ledger::CommitmentLedger::apply_outcome)
//! with the caller's expected revision, so a slow pass can never overwrite
//! a newer decision.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod ledger;
pub mod oracle;
pub mod proof;

// Re-export commonly used types
pub use crate::core::amount::{MAX_SUPPLY_SATS, SATS_PER_BTC};
pub use crate::core::time::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::ConfigError;
pub use engine::{CommitmentStateChanged, EngineConfig, SubmitError, VerificationService};
pub use ledger::{Commitment, CommitmentId, CommitmentLedger, CommitmentState, Eligibility, LedgerConfig, LedgerError};
pub use oracle::{OracleAttestation, OracleClient, OracleConfig, OracleError};
pub use proof::{CommitmentSigner, ProofConfig, ProofError, ProofValidator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
