//! Core primitives.
//!
//! Hashing, time and amount arithmetic shared by every component.
//! Nothing here performs I/O.

pub mod amount;
pub mod hash;
pub mod time;

// Re-export core types
pub use amount::{sats_to_usd_cents, MAX_SUPPLY_SATS, SATS_PER_BTC};
pub use hash::{CommitHasher, Hash256};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
