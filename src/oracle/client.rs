//! Oracle Client
//!
//! Retrieves balance attestations and insulates the rest of the system from
//! oracle flakiness:
//!
//! - **Cache**: a hit inside the TTL returns without touching the feed.
//! - **De-duplication**: at most one in-flight feed request per address;
//!   concurrent callers for the same address share its result.
//! - **Retry**: `Timeout` and `FeedUnavailable` are retried with exponential
//!   backoff; once the budget is spent the caller sees `ExhaustedRetries`.
//! - **Staleness**: attestations past the freshness threshold are served
//!   tagged `Stale` up to the tolerance band, and rejected beyond it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::config::{env_or, ConfigError};
use crate::core::time::Clock;
use crate::oracle::attestation::{Freshness, OracleAttestation};
use crate::oracle::cache::AttestationCache;
use crate::oracle::feed::OracleFeed;

/// Oracle errors.
///
/// `Clone` so that one in-flight result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Feed could not be reached or answered with an error.
    #[error("oracle feed unavailable: {0}")]
    FeedUnavailable(String),
    /// Feed did not answer in time.
    #[error("oracle request timed out")]
    Timeout,
    /// Feed answered, but the observation is older than the tolerance band.
    #[error("oracle data too stale: {age_secs}s old")]
    StaleData {
        /// Age of the observation.
        age_secs: u64,
    },
    /// Attestation verification data failed independent validation.
    #[error("oracle attestation proof invalid: {0}")]
    InvalidProof(String),
    /// Retry budget spent on retryable failures.
    #[error("oracle retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Feed calls made.
        attempts: u32,
        /// Final underlying error.
        last: Box<OracleError>,
    },
}

impl OracleError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FeedUnavailable(_) | Self::Timeout)
    }

    /// Feed calls behind this error.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::ExhaustedRetries { attempts, .. } => *attempts,
            _ => 1,
        }
    }
}

/// Exponential backoff schedule.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total feed calls per fetch, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier between consecutive delays.
    pub factor: u32,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `retry`-th failure (0-based): `base * factor^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(retry))
            .min(self.max_delay)
    }

    /// Sum of every delay the policy can incur.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|retry| self.delay_for(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Oracle client configuration.
#[derive(Clone, Debug)]
pub struct OracleConfig {
    /// Cache TTL, also the freshness threshold for observations.
    pub cache_ttl_secs: u64,
    /// Stale observations stay usable up to `cache_ttl_secs * stale_tolerance_factor`.
    pub stale_tolerance_factor: u64,
    /// Retry schedule for retryable feed errors.
    pub retry: RetryPolicy,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            stale_tolerance_factor: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl OracleConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            cache_ttl_secs: env_or("COMMIT_ORACLE_TTL_SECS", defaults.cache_ttl_secs)?,
            stale_tolerance_factor: env_or("COMMIT_ORACLE_STALE_FACTOR", defaults.stale_tolerance_factor)?,
            retry: RetryPolicy {
                max_attempts: env_or("COMMIT_ORACLE_MAX_ATTEMPTS", defaults.retry.max_attempts)?.max(1),
                base_delay: Duration::from_millis(env_or(
                    "COMMIT_ORACLE_BACKOFF_BASE_MS",
                    defaults.retry.base_delay.as_millis() as u64,
                )?),
                factor: defaults.retry.factor,
                max_delay: Duration::from_millis(env_or(
                    "COMMIT_ORACLE_BACKOFF_CAP_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )?),
            },
        })
    }

    /// Oldest observation the client will serve at all.
    pub fn max_usable_age_secs(&self) -> u64 {
        self.cache_ttl_secs.saturating_mul(self.stale_tolerance_factor)
    }
}

/// An attestation handed to a caller for one reconciliation pass.
///
/// The attestation itself stays owned by the cache; callers share it
/// read-only through the `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServedAttestation {
    /// The observation.
    pub attestation: Arc<OracleAttestation>,
    /// Staleness tag at serve time.
    pub freshness: Freshness,
    /// Feed calls made to produce it (0 on a cache hit).
    pub attempts: u32,
}

/// Result shared between de-duplicated callers.
pub type FetchResult = Result<ServedAttestation, OracleError>;

type InFlight = Mutex<HashMap<String, broadcast::Sender<FetchResult>>>;

/// Removes the in-flight entry even if the leading fetch is cancelled.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    btc_address: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(self.btc_address);
    }
}

enum Role {
    Leader(broadcast::Sender<FetchResult>),
    Follower(broadcast::Receiver<FetchResult>),
}

/// Caching, de-duplicating, retrying oracle client.
pub struct OracleClient {
    feed: Arc<dyn OracleFeed>,
    cache: Arc<AttestationCache>,
    clock: Arc<dyn Clock>,
    config: OracleConfig,
    in_flight: InFlight,
}

impl OracleClient {
    /// Create a client around an injected feed, cache and clock.
    pub fn new(
        feed: Arc<dyn OracleFeed>,
        cache: Arc<AttestationCache>,
        clock: Arc<dyn Clock>,
        config: OracleConfig,
    ) -> Self {
        Self {
            feed,
            cache,
            clock,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Fetch the balance attestation for `btc_address`.
    ///
    /// Concurrent callers for one address share a single feed request. If
    /// the caller driving that request is cancelled, the others start over
    /// and one of them takes the request on.
    #[instrument(skip(self))]
    pub async fn fetch_balance(&self, btc_address: &str) -> FetchResult {
        loop {
            if let Some(result) = self.fetch_once(btc_address).await {
                return result;
            }
            debug!("in-flight oracle request abandoned, retrying");
        }
    }

    /// One attempt to lead or join the request for `btc_address`.
    ///
    /// None when the request being followed was dropped before publishing.
    async fn fetch_once(&self, btc_address: &str) -> Option<FetchResult> {
        if let Some(served) = self.cached(btc_address).await {
            return Some(Ok(served));
        }

        let role = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(btc_address) {
                Some(tx) => Role::Follower(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    in_flight.insert(btc_address.to_string(), tx.clone());
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                debug!("joining in-flight oracle request");
                rx.recv().await.ok()
            }
            Role::Leader(tx) => {
                let guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    btc_address,
                };
                // A leader that finished between our cache miss and taking the
                // slot has already populated the cache.
                let result = match self.cached(btc_address).await {
                    Some(served) => Ok(served),
                    None => self.fetch_with_retry(btc_address).await,
                };
                drop(guard);
                // Waiters that subscribed before the entry was removed get the result;
                // later callers hit the cache populated above.
                let _ = tx.send(result.clone());
                Some(result)
            }
        }
    }

    /// Drop expired cache entries.
    pub async fn purge_cache(&self) -> usize {
        self.cache.purge_expired(self.clock.now()).await
    }

    async fn cached(&self, btc_address: &str) -> Option<ServedAttestation> {
        let now = self.clock.now();
        let attestation = self.cache.get(btc_address, now).await?;
        match self.classify(&attestation) {
            Ok(freshness) => {
                debug!(?freshness, "oracle cache hit");
                Some(ServedAttestation {
                    attestation,
                    freshness,
                    attempts: 0,
                })
            }
            Err(_) => {
                self.cache.evict(btc_address).await;
                None
            }
        }
    }

    async fn fetch_with_retry(&self, btc_address: &str) -> FetchResult {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.feed.fetch(btc_address).await {
                Ok(attestation) => return self.accept(btc_address, attestation, attempt).await,
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(attempt, error = %err, "oracle request failed");
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "oracle retries exhausted");
                return Err(OracleError::ExhaustedRetries {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = policy.delay_for(attempt - 1);
            warn!(attempt, ?delay, error = %err, "oracle request failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn accept(&self, btc_address: &str, attestation: OracleAttestation, attempts: u32) -> FetchResult {
        if attestation.btc_address != btc_address {
            return Err(OracleError::InvalidProof(format!(
                "attestation is for {}, requested {}",
                attestation.btc_address, btc_address
            )));
        }

        if let Some(proof) = &attestation.utxo_proof {
            proof
                .verify(attestation.balance_satoshis)
                .map_err(OracleError::InvalidProof)?;
        }

        let freshness = self.classify(&attestation)?;
        let attestation = Arc::new(attestation);
        self.cache.put(attestation.clone(), self.clock.now()).await;

        debug!(
            balance = attestation.balance_satoshis,
            source = %attestation.source_id,
            ?freshness,
            attempts,
            "oracle attestation accepted"
        );

        Ok(ServedAttestation {
            attestation,
            freshness,
            attempts,
        })
    }

    fn classify(&self, attestation: &OracleAttestation) -> Result<Freshness, OracleError> {
        let age_secs = attestation.age(self.clock.now());
        if age_secs <= self.config.cache_ttl_secs {
            Ok(Freshness::Fresh)
        } else if age_secs <= self.config.max_usable_age_secs() {
            Ok(Freshness::Stale { age_secs })
        } else {
            Err(OracleError::StaleData { age_secs })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::oracle::attestation::{Utxo, UtxoProof};
    use crate::oracle::feed::ScriptedFeed;

    const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
    const NOW: u64 = 1_700_000_000;

    fn attestation(balance: u64, observed_at: u64) -> OracleAttestation {
        OracleAttestation {
            btc_address: ADDRESS.into(),
            balance_satoshis: balance,
            usd_price: 6_500_000,
            observed_at,
            source_id: "scripted".into(),
            utxo_proof: None,
        }
    }

    fn fast_config() -> OracleConfig {
        OracleConfig {
            retry: RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                ..RetryPolicy::default()
            },
            ..OracleConfig::default()
        }
    }

    fn client(feed: Arc<ScriptedFeed>, clock: &ManualClock) -> OracleClient {
        OracleClient::new(
            feed,
            Arc::new(AttestationCache::new(300)),
            Arc::new(clock.clone()),
            fast_config(),
        )
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
        // 1 + 2 + 4 + 8
        assert_eq!(policy.total_budget(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_two_fetches_inside_ttl_hit_feed_once() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.set(ADDRESS, Ok(attestation(100_000_000, NOW)));
        let client = client(feed.clone(), &clock);

        let first = client.fetch_balance(ADDRESS).await.unwrap();
        clock.advance(299);
        let second = client.fetch_balance(ADDRESS).await.unwrap();

        assert_eq!(feed.calls(), 1);
        assert_eq!(first.attempts, 1);
        assert_eq!(second.attempts, 0);
        assert!(Arc::ptr_eq(&first.attestation, &second.attestation));
    }

    #[tokio::test]
    async fn test_fetch_after_ttl_goes_to_feed() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.push(ADDRESS, Ok(attestation(1, NOW)));
        feed.push(ADDRESS, Ok(attestation(2, NOW + 300)));
        let client = client(feed.clone(), &clock);

        client.fetch_balance(ADDRESS).await.unwrap();
        clock.advance(300);
        let served = client.fetch_balance(ADDRESS).await.unwrap();

        assert_eq!(feed.calls(), 2);
        assert_eq!(served.attestation.balance_satoshis, 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_request() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::with_latency(Duration::from_millis(50)));
        feed.set(ADDRESS, Ok(attestation(7, NOW)));
        let client = Arc::new(client(feed.clone(), &clock));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.fetch_balance(ADDRESS).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().attestation.balance_satoshis, 7);
        }
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_fail_waiters() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::with_latency(Duration::from_millis(200)));
        feed.set(ADDRESS, Ok(attestation(9, NOW)));
        let client = Arc::new(client(feed.clone(), &clock));

        let leader = {
            let client = client.clone();
            tokio::spawn(async move {
                tokio::time::timeout(Duration::from_millis(20), client.fetch_balance(ADDRESS)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch_balance(ADDRESS).await })
        };

        assert!(leader.await.unwrap().is_err());
        let served = waiter.await.unwrap().unwrap();
        assert_eq!(served.attestation.balance_satoshis, 9);
        assert_eq!(served.attempts, 1);
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.push(ADDRESS, Err(OracleError::Timeout));
        feed.push(ADDRESS, Err(OracleError::FeedUnavailable("503".into())));
        feed.set(ADDRESS, Ok(attestation(5, NOW)));
        let client = client(feed.clone(), &clock);

        let served = client.fetch_balance(ADDRESS).await.unwrap();
        assert_eq!(served.attempts, 3);
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.set(ADDRESS, Err(OracleError::FeedUnavailable("down".into())));
        let client = client(feed.clone(), &clock);

        let err = client.fetch_balance(ADDRESS).await.unwrap_err();
        assert_eq!(
            err,
            OracleError::ExhaustedRetries {
                attempts: 5,
                last: Box::new(OracleError::FeedUnavailable("down".into())),
            }
        );
        assert_eq!(err.attempts(), 5);
        assert_eq!(feed.calls(), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces_immediately() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.set(ADDRESS, Err(OracleError::InvalidProof("bad root".into())));
        let client = client(feed.clone(), &clock);

        assert!(matches!(client.fetch_balance(ADDRESS).await, Err(OracleError::InvalidProof(_))));
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test]
    async fn test_staleness_band() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.push(ADDRESS, Ok(attestation(1, NOW - 450)));
        let client = client(feed.clone(), &clock);

        let served = client.fetch_balance(ADDRESS).await.unwrap();
        assert_eq!(served.freshness, Freshness::Stale { age_secs: 450 });

        // Past 2x TTL the call fails instead of serving outdated numbers.
        let feed = Arc::new(ScriptedFeed::new());
        feed.push(ADDRESS, Ok(attestation(1, NOW - 601)));
        let client = self::client(feed, &clock);
        assert_eq!(
            client.fetch_balance(ADDRESS).await,
            Err(OracleError::StaleData { age_secs: 601 })
        );
    }

    #[tokio::test]
    async fn test_cached_entry_reclassified_on_hit() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.push(ADDRESS, Ok(attestation(1, NOW - 500)));
        feed.push(ADDRESS, Ok(attestation(2, NOW + 200)));
        let client = client(feed.clone(), &clock);

        client.fetch_balance(ADDRESS).await.unwrap();
        // Still inside cache TTL, but the observation is now 700s old.
        clock.advance(200);
        let served = client.fetch_balance(ADDRESS).await.unwrap();

        assert_eq!(feed.calls(), 2);
        assert_eq!(served.attestation.balance_satoshis, 2);
        assert_eq!(served.freshness, Freshness::Fresh);
    }

    #[tokio::test]
    async fn test_utxo_proof_validated() {
        let clock = ManualClock::new(NOW);
        let snapshot: Vec<Utxo> = (0u8..4)
            .map(|i| Utxo { txid: [i; 32], vout: 0, value_sats: 25_000_000 })
            .collect();

        let mut good = attestation(50_000_000, NOW);
        good.utxo_proof = UtxoProof::build(&snapshot, &[0, 2], 840_000);
        let mut forged = attestation(75_000_000, NOW);
        forged.utxo_proof = UtxoProof::build(&snapshot, &[0, 2], 840_000);

        let feed = Arc::new(ScriptedFeed::new());
        feed.push(ADDRESS, Ok(forged));
        feed.push(ADDRESS, Ok(good));
        let client = client(feed.clone(), &clock);

        assert!(matches!(client.fetch_balance(ADDRESS).await, Err(OracleError::InvalidProof(_))));
        assert_eq!(client.fetch_balance(ADDRESS).await.unwrap().attestation.balance_satoshis, 50_000_000);
    }

    #[tokio::test]
    async fn test_address_mismatch_rejected() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        let mut wrong = attestation(1, NOW);
        wrong.btc_address = "bc1qsomeoneelse".into();
        feed.push(ADDRESS, Ok(wrong));
        let client = client(feed, &clock);

        assert!(matches!(client.fetch_balance(ADDRESS).await, Err(OracleError::InvalidProof(_))));
    }

    #[tokio::test]
    async fn test_purge_cache() {
        let clock = ManualClock::new(NOW);
        let feed = Arc::new(ScriptedFeed::new());
        feed.set(ADDRESS, Ok(attestation(1, NOW)));
        let client = client(feed, &clock);

        client.fetch_balance(ADDRESS).await.unwrap();
        assert_eq!(client.purge_cache().await, 0);
        clock.advance(301);
        assert_eq!(client.purge_cache().await, 1);
    }
}
