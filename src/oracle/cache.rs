//! Attestation Cache
//!
//! Explicitly owned, thread-safe TTL cache keyed by Bitcoin address.
//! Constructed once and injected into the oracle client as an
//! `Arc<AttestationCache>`; there is no process-wide instance.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::core::time::Timestamp;
use crate::oracle::attestation::OracleAttestation;

struct CacheEntry {
    attestation: Arc<OracleAttestation>,
    cached_at: Timestamp,
}

/// TTL cache of attestations.
pub struct AttestationCache {
    ttl_secs: u64,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl AttestationCache {
    /// Create a cache whose entries live `ttl_secs` after insertion.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Entry lifetime.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Cached attestation for `btc_address`, if inserted less than TTL ago.
    pub async fn get(&self, btc_address: &str, now: Timestamp) -> Option<Arc<OracleAttestation>> {
        let entries = self.entries.read().await;
        entries
            .get(btc_address)
            .filter(|entry| now.saturating_sub(entry.cached_at) < self.ttl_secs)
            .map(|entry| entry.attestation.clone())
    }

    /// Insert or replace the entry for the attestation's address.
    pub async fn put(&self, attestation: Arc<OracleAttestation>, now: Timestamp) {
        let mut entries = self.entries.write().await;
        entries.insert(
            attestation.btc_address.clone(),
            CacheEntry {
                attestation,
                cached_at: now,
            },
        );
    }

    /// Drop the entry for `btc_address`.
    pub async fn evict(&self, btc_address: &str) -> bool {
        self.entries.write().await.remove(btc_address).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.cached_at) < self.ttl_secs);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, remaining = entries.len(), "purged expired attestations");
        }
        purged
    }

    /// Number of entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
