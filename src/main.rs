//! BTC Commitment Verifier
//!
//! Runs the reconciliation loop against an HTTP oracle feed and a durable
//! ledger until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use btc_commitment::{
    engine::{EngineConfig, VerificationService},
    ledger::{CommitmentLedger, LedgerConfig},
    oracle::{AttestationCache, FeedConfig, HttpOracleFeed, OracleClient, OracleConfig},
    proof::{ProofConfig, ProofValidator},
    Clock, SystemClock, VERSION,
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .init();

    info!("BTC Commitment Verifier v{}", VERSION);

    let proof_config = ProofConfig::from_env()?;
    let oracle_config = OracleConfig::from_env()?;
    let feed_config = FeedConfig::from_env()?;
    let ledger_config = LedgerConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    info!(
        network = %proof_config.network,
        ttl_secs = oracle_config.cache_ttl_secs,
        max_attempts = oracle_config.retry.max_attempts,
        retry_budget = ?oracle_config.retry.total_budget(),
        ledger = %ledger_config.path.display(),
        grace_secs = ledger_config.degraded_grace_secs,
        "configuration loaded"
    );

    let base_url = feed_config
        .base_url
        .clone()
        .context("COMMIT_ORACLE_URL must be set")?;
    let feed = Arc::new(HttpOracleFeed::new(base_url, feed_config.request_timeout)?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(AttestationCache::new(oracle_config.cache_ttl_secs));
    let oracle = Arc::new(OracleClient::new(feed, cache, clock.clone(), oracle_config));
    let ledger = Arc::new(CommitmentLedger::open(ledger_config).context("opening commitment ledger")?);

    let service = Arc::new(VerificationService::new(
        ProofValidator::new(proof_config),
        ledger.clone(),
        oracle,
        clock,
        engine_config,
    ));

    info!(commitments = ledger.len().await, states = ?ledger.state_counts().await, "ledger ready");

    let mut events = service.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "commitment_events", "{}", json),
                    Err(e) => error!("Failed to encode event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let engine = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");
    service.shutdown();

    engine.await.context("engine task")?;
    event_log.abort();

    info!(states = ?ledger.state_counts().await, "shutdown complete");
    Ok(())
}
