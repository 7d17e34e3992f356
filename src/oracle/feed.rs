//! Oracle Feed Capability
//!
//! The external price/UTXO oracle network seen as one capability:
//! `fetch(btc_address) -> attestation | error`.
//!
//! - [`HttpOracleFeed`] talks to a JSON-over-HTTP oracle endpoint.
//! - [`ScriptedFeed`] is a programmable in-process feed used in tests and demos.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{env_opt, env_or, ConfigError};
use crate::oracle::attestation::OracleAttestation;
use crate::oracle::client::OracleError;

/// Source of raw attestations.
///
/// Implementations perform exactly one request per call; retries, caching
/// and de-duplication belong to the [`OracleClient`](crate::oracle::OracleClient).
#[async_trait]
pub trait OracleFeed: Send + Sync {
    /// Fetch the current attestation for `btc_address`.
    async fn fetch(&self, btc_address: &str) -> Result<OracleAttestation, OracleError>;
}

// =============================================================================
// HTTP FEED
// =============================================================================

/// HTTP feed configuration.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Oracle base URL, e.g. `https://oracle.example.com`.
    pub base_url: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl FeedConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env_opt("COMMIT_ORACLE_URL"),
            request_timeout: Duration::from_secs(env_or(
                "COMMIT_ORACLE_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

/// Oracle feed over HTTP.
///
/// `GET {base_url}/v1/balance/{address}` returning an [`OracleAttestation`]
/// as JSON.
pub struct HttpOracleFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracleFeed {
    /// Create a feed for `base_url`.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OracleError::FeedUnavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn balance_url(&self, btc_address: &str) -> String {
        format!("{}/v1/balance/{}", self.base_url, btc_address)
    }
}

#[async_trait]
impl OracleFeed for HttpOracleFeed {
    async fn fetch(&self, btc_address: &str) -> Result<OracleAttestation, OracleError> {
        let url = self.balance_url(btc_address);
        debug!(%url, "requesting oracle attestation");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(map_reqwest_error)?;

        response.json::<OracleAttestation>().await.map_err(map_reqwest_error)
    }
}

/// Map transport errors onto the oracle taxonomy.
fn map_reqwest_error(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else if err.is_decode() {
        OracleError::FeedUnavailable(format!("malformed oracle response: {}", err))
    } else {
        OracleError::FeedUnavailable(err.to_string())
    }
}

// =============================================================================
// SCRIPTED FEED
// =============================================================================

type Scripted = Result<OracleAttestation, OracleError>;

#[derive(Default)]
struct Script {
    /// One-shot responses, consumed in order.
    queued: HashMap<String, VecDeque<Scripted>>,
    /// Sticky response once the queue is empty.
    fallback: HashMap<String, Scripted>,
}

/// Programmable feed.
///
/// Responses are queued per address; when an address has nothing queued
/// the sticky response set with [`ScriptedFeed::set`] is returned, and
/// `FeedUnavailable` if there is none.
#[derive(Default)]
pub struct ScriptedFeed {
    script: Mutex<Script>,
    calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feed that sleeps `latency` before every response.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Queue a one-shot response for `btc_address`.
    pub fn push(&self, btc_address: &str, response: Scripted) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script
            .queued
            .entry(btc_address.to_string())
            .or_default()
            .push_back(response);
    }

    /// Set the sticky response for `btc_address`.
    pub fn set(&self, btc_address: &str, response: Scripted) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.fallback.insert(btc_address.to_string(), response);
    }

    /// Number of `fetch` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self, btc_address: &str) -> Scripted {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(response) = script.queued.get_mut(btc_address).and_then(VecDeque::pop_front) {
            return response;
        }
        script
            .fallback
            .get(btc_address)
            .cloned()
            .unwrap_or_else(|| Err(OracleError::FeedUnavailable(format!("no script for {}", btc_address))))
    }
}

#[async_trait]
impl OracleFeed for ScriptedFeed {
    async fn fetch(&self, btc_address: &str) -> Result<OracleAttestation, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_response(btc_address)
    }
}
