//! Round driver
//!
//! One task owns the whole round lifecycle, so mutual exclusion of
//! Active/Aggregating needs no extra locking: the driver selects and
//! claims participants, arms the deadline timer, hands the collected
//! updates to the aggregator, awaits its completion signal, settles the
//! participants, and goes around again. Rounds always run their full
//! length; early uploads sit in the store until the deadline.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::aggregation::{AggregationRequest, Aggregator};
use crate::config::{Config, RoundConfig};
use crate::fleet::ProviderRegistry;
use crate::metrics;
use crate::profile::ProfileStore;
use crate::scheduler::{select_for_round, GpuPowerTable, SelectionParams};
use crate::storage::ArtifactStore;

use super::state::{RoundPhase, RoundStatus};

// ============================================================================
// Round Manager
// ============================================================================

/// Drives rounds from selection through settlement
pub struct RoundManager {
    /// Shared driver state handed to the spawned task
    driver: Driver,

    /// Shutdown signal sender
    shutdown: watch::Sender<bool>,

    /// Shutdown receiver template
    shutdown_rx: watch::Receiver<bool>,
}

/// Everything the driver task needs, cheap to clone into the task
#[derive(Clone)]
struct Driver {
    registry: Arc<ProviderRegistry>,
    profiles: Arc<dyn ProfileStore>,
    store: ArtifactStore,
    aggregator: Arc<dyn Aggregator>,
    status: Arc<RwLock<RoundStatus>>,
    round: RoundConfig,
    staleness: chrono::Duration,
    gpu_power: GpuPowerTable,
}

/// A round fixed at activation
struct ActiveRound {
    ordinal: u64,
    participants: Vec<String>,
}

impl RoundManager {
    /// Create a new round manager
    pub fn new(
        registry: Arc<ProviderRegistry>,
        profiles: Arc<dyn ProfileStore>,
        store: ArtifactStore,
        aggregator: Arc<dyn Aggregator>,
        config: &Config,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);

        Self {
            driver: Driver {
                registry,
                profiles,
                store,
                aggregator,
                status: Arc::new(RwLock::new(RoundStatus::default())),
                round: config.round.clone(),
                staleness: config.fleet.staleness(),
                gpu_power: GpuPowerTable::from_config(&config.scheduler),
            },
            shutdown,
            shutdown_rx,
        }
    }

    /// Shared round status, for the HTTP surface and the sweeper
    pub fn status_handle(&self) -> Arc<RwLock<RoundStatus>> {
        self.driver.status.clone()
    }

    /// Start the driver task
    pub fn start(&self) -> RoundManagerHandle {
        let driver = self.driver.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let driver_handle = tokio::spawn(async move {
            // grace period so the first providers can register
            if !driver.round.startup_grace().is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(driver.round.startup_grace()) => {}
                    _ = shutdown_rx.changed() => {
                        info!("Round driver shutting down before first round");
                        return;
                    }
                }
            }

            loop {
                let Some(round) = driver.try_activate().await else {
                    // nobody eligible; retry without advancing the ordinal
                    tokio::select! {
                        _ = tokio::time::sleep(driver.round.empty_backoff()) => continue,
                        _ = shutdown_rx.changed() => break,
                    }
                };

                // the deadline is the only thing that ends an active round
                tokio::select! {
                    _ = tokio::time::sleep(driver.round.timeout()) => {}
                    _ = shutdown_rx.changed() => {
                        info!("Round driver shutting down mid-round {}", round.ordinal);
                        break;
                    }
                }

                if !driver.close_round(&round, &mut shutdown_rx).await {
                    break;
                }
            }

            info!("Round driver stopped");
        });

        RoundManagerHandle {
            driver_handle,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Driver {
    /// Select, claim, and activate the next round
    ///
    /// Returns `None` when nobody is eligible; the ordinal does not
    /// advance in that case.
    async fn try_activate(&self) -> Option<ActiveRound> {
        let snapshot = self.registry.snapshot().await;
        let params = SelectionParams {
            max_count: self.round.max_per_round,
            round_duration_minutes: self.round.duration_minutes,
            staleness: self.staleness,
            gpu_power: &self.gpu_power,
        };

        let selected = select_for_round(&snapshot, Utc::now(), &params);
        if selected.is_empty() {
            info!(
                "No eligible providers, retrying in {}s",
                self.round.empty_backoff_secs
            );
            metrics::record_empty_selection();
            return None;
        }

        let ids: Vec<String> = selected.iter().map(|c| c.id.clone()).collect();
        let participants = self.registry.claim_for_round(&ids).await;
        if participants.is_empty() {
            // everyone selected vanished between snapshot and claim
            info!("Selected providers no longer claimable, retrying");
            metrics::record_empty_selection();
            return None;
        }

        let ordinal = {
            let mut status = self.status.write().await;
            status.ordinal += 1;
            status.participants = participants.clone();
            if let Err(err) = status.advance(RoundPhase::Active) {
                error!("Round state out of step: {err}");
            }
            status.ordinal
        };

        metrics::set_current_round(ordinal);
        info!(
            "Round {} started with {} participants: {:?}",
            ordinal,
            participants.len(),
            participants
        );

        Some(ActiveRound {
            ordinal,
            participants,
        })
    }

    /// Aggregate and settle a round whose deadline has passed
    ///
    /// Returns false only when shutdown interrupts the aggregation.
    async fn close_round(
        &self,
        round: &ActiveRound,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let ordinal = round.ordinal;

        {
            let mut status = self.status.write().await;
            if let Err(err) = status.advance(RoundPhase::Aggregating) {
                error!("Round state out of step: {err}");
            }
        }

        let update_refs = match self.store.update_refs(ordinal).await {
            Ok(refs) => refs,
            Err(err) => {
                // aggregate with none; the merge carries the model forward
                error!("Failed to collect updates for round {ordinal}: {err}");
                Vec::new()
            }
        };

        let global_model = match self.store.latest_global().await {
            Ok(latest) => latest.map(|(_, path)| path),
            Err(err) => {
                warn!("Failed to resolve latest global model: {err}");
                None
            }
        };

        info!(
            "Round {} deadline reached, aggregating {} updates",
            ordinal,
            update_refs.len()
        );

        let request = AggregationRequest {
            ordinal,
            global_model,
            update_refs,
            model_dir: self.store.model_dir().to_path_buf(),
            updates_dir: self.store.updates_dir().to_path_buf(),
        };

        // the merge runs on its own task; the driver waits for its
        // completion signal, never a fixed delay
        let aggregator = self.aggregator.clone();
        let merge = tokio::spawn(async move { aggregator.aggregate(request).await });

        let started = Instant::now();
        let joined = tokio::select! {
            joined = merge => joined,
            _ = shutdown_rx.changed() => {
                info!("Shutdown during aggregation of round {ordinal}");
                return false;
            }
        };

        let failed = match joined {
            Ok(Ok(outcome)) => {
                metrics::record_aggregation(outcome.elapsed.as_secs_f64(), false);
                info!(
                    "Round {} aggregated ({} updates -> {})",
                    ordinal,
                    outcome.update_count,
                    outcome.artifact.display()
                );
                false
            }
            Ok(Err(err)) => {
                metrics::record_aggregation(started.elapsed().as_secs_f64(), true);
                error!("Round {ordinal} aggregation failed: {err}");
                true
            }
            Err(join_err) => {
                metrics::record_aggregation(started.elapsed().as_secs_f64(), true);
                error!("Round {ordinal} aggregation task aborted: {join_err}");
                true
            }
        };

        // consumed or not, this round's updates are never read again
        if let Err(err) = self.store.purge_updates(ordinal).await {
            warn!("Failed to purge round {ordinal} updates: {err}");
        }

        self.settle(round, failed).await;
        true
    }

    /// Charge participants, hand back the idle ones, report exhaustions
    async fn settle(&self, round: &ActiveRound, aggregation_failed: bool) {
        let charge = !(aggregation_failed && self.round.refund_on_failure);
        let accounting = self
            .registry
            .complete_participants(&round.participants, self.round.duration_minutes, charge)
            .await;

        if !accounting.missing.is_empty() {
            debug!(
                "Round {} participants gone before settlement: {:?}",
                round.ordinal, accounting.missing
            );
        }

        if !accounting.exhausted.is_empty() {
            info!(
                "Round {} exhausted providers: {:?}",
                round.ordinal, accounting.exhausted
            );

            let notifications = accounting
                .exhausted
                .iter()
                .map(|id| self.profiles.mark_exhausted(id));

            for (id, result) in accounting
                .exhausted
                .iter()
                .zip(futures::future::join_all(notifications).await)
            {
                if let Err(err) = result {
                    warn!("Failed to mark profile '{id}' exhausted: {err}");
                }
            }
        }

        {
            let mut status = self.status.write().await;
            status.participants.clear();
            if let Err(err) = status.advance(RoundPhase::Pending) {
                error!("Round state out of step: {err}");
            }
        }

        metrics::record_round_completed();
        info!(
            "Round {} settled: {} back to idle, {} exhausted",
            round.ordinal,
            accounting.idle.len(),
            accounting.exhausted.len()
        );
    }
}

// ============================================================================
// Manager Handle
// ============================================================================

/// Handle for managing the running driver task
pub struct RoundManagerHandle {
    driver_handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RoundManagerHandle {
    /// Wait for the driver to complete
    pub async fn wait(self) {
        let _ = self.driver_handle.await;
    }

    /// Trigger shutdown and wait
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }

    /// Check if the driver is still running
    pub fn is_finished(&self) -> bool {
        self.driver_handle.is_finished()
    }
}

// ============================================================================
// Tests
// ============================================================================
