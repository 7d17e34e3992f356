//! Reconciliation Scheduler
//!
//! Wakes on a fixed tick, asks the ledger what is due, and dispatches one
//! task per due commitment onto a bounded worker pool.
//!
//! - A commitment never has two passes running at once.
//! - When the pool is full the rest of the due list is left for the next
//!   tick, where it is re-ordered oldest-first. Nothing is dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::config::{env_or, ConfigError};
use crate::core::time::Clock;
use crate::engine::reconcile::Reconciler;
use crate::ledger::commitment::CommitmentId;
use crate::ledger::registry::CommitmentLedger;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How often each commitment is re-verified.
    pub verify_interval_secs: u64,
    /// Scanner wake period.
    pub scan_tick: Duration,
    /// Worker pool size.
    pub max_workers: usize,
    /// Overall deadline for one pass, oracle retries included.
    pub pass_deadline: Duration,
    /// Undelivered events retained per subscriber.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verify_interval_secs: 60,
            scan_tick: Duration::from_secs(10),
            max_workers: 16,
            pass_deadline: Duration::from_secs(180),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            verify_interval_secs: env_or("COMMIT_VERIFY_INTERVAL_SECS", defaults.verify_interval_secs)?,
            scan_tick: Duration::from_secs(env_or("COMMIT_SCAN_TICK_SECS", defaults.scan_tick.as_secs())?.max(1)),
            max_workers: env_or("COMMIT_WORKERS", defaults.max_workers)?.max(1),
            ..defaults
        })
    }
}

/// What one scan did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Commitments the ledger reported due.
    pub due: usize,
    /// Passes started.
    pub dispatched: usize,
    /// Due but already being reconciled.
    pub skipped_in_flight: usize,
    /// Due but the pool was full; retried next tick.
    pub deferred: usize,
}

type InFlightSet = Arc<Mutex<HashSet<CommitmentId>>>;

/// Releases a commitment's in-flight slot when its task ends, however it ends.
struct InFlightSlot {
    set: InFlightSet,
    id: CommitmentId,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.set.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
    }
}

/// Tick-driven dispatcher.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    ledger: Arc<CommitmentLedger>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    in_flight: InFlightSet,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(
        reconciler: Arc<Reconciler>,
        ledger: Arc<CommitmentLedger>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let workers = config.max_workers.max(1);
        Self {
            reconciler,
            ledger,
            clock,
            permits: Arc::new(Semaphore::new(workers)),
            config: EngineConfig {
                max_workers: workers,
                ..config
            },
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One scan: list due commitments and dispatch as many as the pool allows.
    pub async fn scan_once(&self) -> ScanReport {
        let now = self.clock.now();
        let due = self
            .ledger
            .list_due_for_verification(now, self.config.verify_interval_secs)
            .await;

        let mut report = ScanReport {
            due: due.len(),
            ..ScanReport::default()
        };

        for id in due {
            let slot = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                if !in_flight.insert(id) {
                    report.skipped_in_flight += 1;
                    continue;
                }
                InFlightSlot {
                    set: self.in_flight.clone(),
                    id,
                }
            };

            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    drop(slot);
                    report.deferred += 1;
                    continue;
                }
            };

            let reconciler = self.reconciler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _slot = slot;
                if let Err(e) = reconciler.reconcile(id).await {
                    error!(commitment_id = %id, error = %e, "reconciliation failed");
                }
            });
            report.dispatched += 1;
        }

        debug!(
            due = report.due,
            dispatched = report.dispatched,
            skipped = report.skipped_in_flight,
            deferred = report.deferred,
            "scan complete"
        );
        report
    }

    /// Wait until every dispatched pass has finished.
    pub async fn wait_idle(&self) {
        let workers = u32::try_from(self.config.max_workers).unwrap_or(u32::MAX);
        if let Ok(all) = self.permits.acquire_many(workers).await {
            drop(all);
        }
    }

    /// Run the tick loop until [`shutdown`](Self::shutdown).
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            tick = ?self.config.scan_tick,
            interval_secs = self.config.verify_interval_secs,
            workers = self.config.max_workers,
            "verification engine started"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(self.config.scan_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_once().await;
                    self.reconciler.oracle().purge_cache().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.wait_idle().await;
        info!("verification engine stopped");
    }

    /// Stop [`run`](Self::run) after in-flight passes complete.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Passes currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
