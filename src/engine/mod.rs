//! Verification Engine
//!
//! The periodic reconciliation loop that drives every commitment through
//! its state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 VERIFICATION ENGINE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  scheduler.rs - Tick loop, bounded worker pool, shutdown    │
//! │  reconcile.rs - One pass: oracle → proof → balance → ledger │
//! │  events.rs    - State change broadcast                      │
//! │  service.rs   - Submission API and read-only queries        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod reconcile;
pub mod scheduler;
pub mod service;

// Re-export key types
pub use events::{CommitmentStateChanged, EventBus};
pub use reconcile::Reconciler;
pub use scheduler::{EngineConfig, ScanReport, Scheduler};
pub use service::{SubmitError, VerificationService};
