//! Oracle Integration
//!
//! Balance and price attestations from an external oracle network.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ORACLE CLIENT                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  attestation.rs - Observations, UTXO inclusion proofs       │
//! │  feed.rs        - Feed capability (HTTP, scripted)          │
//! │  cache.rs       - Injected TTL cache                        │
//! │  client.rs      - Dedup, retry/backoff, staleness band      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod attestation;
pub mod cache;
pub mod client;
pub mod feed;

// Re-export key types
pub use attestation::{AttestationRef, Freshness, OracleAttestation, Utxo, UtxoProof};
pub use cache::AttestationCache;
pub use client::{OracleClient, OracleConfig, OracleError, RetryPolicy, ServedAttestation};
pub use feed::{FeedConfig, HttpOracleFeed, OracleFeed, ScriptedFeed};
