//! Wall-Clock Abstraction
//!
//! All protocol timestamps are whole seconds since the Unix epoch.
//! Components take an injected [`Clock`] so tests can drive time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // Pre-epoch system clocks clamp to zero rather than panic.
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven clock, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(1_700_000_000);
        let other = clock.clone();

        other.advance(60);
        assert_eq!(clock.now(), 1_700_000_060);

        clock.set(5);
        assert_eq!(other.now(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2023-11-14; any sane host is past this.
        assert!(SystemClock.now() > 1_700_000_000);
    }
}
