//! Proof System
//!
//! Cryptographic checks that keep custody off-chain:
//! - Commitment proofs (ECDSA over a canonical message)
//! - UTXO snapshot inclusion proofs backing oracle balances
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  message.rs   - Canonical message, proof envelope, signer   │
//! │  validator.rs - Stateless proof validation                  │
//! │  merkle.rs    - Binary Merkle tree for UTXO snapshots       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod merkle;
pub mod message;
pub mod validator;

// Re-export key types
pub use merkle::{MerkleProof, MerkleTree};
pub use message::{CommitmentMessage, CommitmentSigner, ProofEnvelope, PROOF_LEN};
pub use validator::{CommitmentClaim, ProofConfig, ProofError, ProofValidator};
