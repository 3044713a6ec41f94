//! Offline detection sweep
//!
//! A background task that periodically evicts providers whose heartbeats
//! have gone stale. It runs concurrently with round transitions and
//! registration traffic; all of them meet at the registry's lock.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::interval;

use crate::config::FleetConfig;
use crate::fleet::registry::ProviderRegistry;
use crate::metrics;
use crate::round::{RoundPhase, RoundStatus};

/// Timing knobs for the sweep, separated from [`FleetConfig`] so tests
/// can run at millisecond scale
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Max heartbeat age before eviction
    pub staleness: chrono::Duration,

    /// Tick interval
    pub interval: std::time::Duration,

    /// Exempt current round participants from eviction
    pub protect_active_participants: bool,
}

impl From<&FleetConfig> for SweepConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            staleness: config.staleness(),
            interval: config.sweep_interval(),
            protect_active_participants: config.protect_active_participants,
        }
    }
}

/// Spawn the offline sweeper background task
pub fn start_offline_sweeper(
    registry: Arc<ProviderRegistry>,
    round_status: Arc<RwLock<RoundStatus>>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let protected = if config.protect_active_participants {
                        let status = round_status.read().await;
                        if status.phase == RoundPhase::Pending {
                            HashSet::new()
                        } else {
                            status.participants.iter().cloned().collect()
                        }
                    } else {
                        HashSet::new()
                    };

                    let evicted = registry
                        .evict_stale(chrono::Utc::now(), config.staleness, &protected)
                        .await;

                    for info in &evicted {
                        tracing::warn!(
                            provider_id = %info.id,
                            heartbeat_age_secs = info.seconds_since_seen(),
                            "Provider offline, evicted from fleet"
                        );
                    }

                    if !evicted.is_empty() {
                        metrics::record_evictions(evicted.len() as u64);
                        metrics::set_live_providers(registry.len().await as i64);
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Offline sweeper shutting down");
                    break;
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
