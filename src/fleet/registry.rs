//! Provider registry for tracking fleet membership
//!
//! This module is the authoritative in-memory view of the fleet. Every
//! mutation (registration, heartbeats, round transitions, eviction)
//! serializes through one lock, and compound operations hold a single
//! write guard for their whole batch so concurrent callers can never
//! observe a half-applied transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::fleet::provider::{HardwareProfile, ProviderInfo, ProviderStatus};

// ============================================================================
// Provider Registry
// ============================================================================

/// Registry for tracking all live providers
pub struct ProviderRegistry {
    /// Registered providers keyed by id
    providers: Arc<RwLock<HashMap<String, ProviderInfo>>>,

    /// Max providers allowed
    max_providers: usize,
}

impl ProviderRegistry {
    /// Create a new registry
    pub fn new(max_providers: usize) -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            max_providers,
        }
    }

    /// Register a provider whose profile has already been accepted
    ///
    /// Inserts or replaces the entry; a replaced entry restarts life as
    /// Idle with a fresh heartbeat.
    pub async fn register(
        &self,
        id: &str,
        capabilities: HardwareProfile,
        availability_minutes: u64,
        reliability_score: f64,
    ) -> Result<(), RegistryError> {
        let mut providers = self.providers.write().await;

        // Capacity applies to new ids only, re-registration always lands
        if !providers.contains_key(id) && providers.len() >= self.max_providers {
            return Err(RegistryError::CapacityExceeded {
                current: providers.len(),
                max: self.max_providers,
            });
        }

        let info = ProviderInfo::new(id, capabilities, availability_minutes, reliability_score);
        providers.insert(id.to_string(), info);

        Ok(())
    }

    /// Record a heartbeat for a provider
    ///
    /// Never implicitly re-registers: an unknown id is an error the
    /// caller surfaces, so an evicted provider learns it must register
    /// again.
    pub async fn heartbeat(&self, id: &str) -> Result<(), RegistryError> {
        let mut providers = self.providers.write().await;

        let info = providers
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))?;

        info.update_heartbeat();
        Ok(())
    }

    /// Get a single provider
    pub async fn get(&self, id: &str) -> Option<ProviderInfo> {
        self.providers.read().await.get(id).cloned()
    }

    /// Immutable copy of the whole fleet, for scheduling and sweeping
    pub async fn snapshot(&self) -> Vec<ProviderInfo> {
        self.providers.read().await.values().cloned().collect()
    }

    /// Remove a provider outright
    pub async fn remove(&self, id: &str) -> Option<ProviderInfo> {
        self.providers.write().await.remove(id)
    }

    /// Number of live providers
    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    /// Check whether the fleet is empty
    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Claim selected providers for a round, marking them Busy
    ///
    /// Selection runs against a snapshot, so by the time the claim lands
    /// a candidate may have been evicted or replaced. Such ids are
    /// skipped; the returned list is the set of participants actually
    /// fixed for the round.
    pub async fn claim_for_round(&self, ids: &[String]) -> Vec<String> {
        let mut providers = self.providers.write().await;
        let now = Utc::now();
        let mut claimed = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(info) = providers.get_mut(id) else {
                tracing::debug!(provider_id = %id, "claim skipped, provider gone");
                continue;
            };

            match Self::apply_transition(info, ProviderStatus::Busy) {
                Ok(()) => {
                    info.last_scheduled_at = Some(now);
                    claimed.push(id.clone());
                }
                Err(err) => {
                    tracing::debug!(provider_id = %id, %err, "claim skipped");
                }
            }
        }

        claimed
    }

    /// Settle participants after a round's aggregation finished
    ///
    /// Charges the round's minutes against each participant still Busy
    /// (unless `charge` is false), returns survivors to Idle, and
    /// removes the ones whose budget hit zero as Exhausted. The caller
    /// notifies the profile store about the exhausted ids.
    pub async fn complete_participants(
        &self,
        ids: &[String],
        minutes: u64,
        charge: bool,
    ) -> RoundAccounting {
        let mut providers = self.providers.write().await;
        let mut accounting = RoundAccounting::default();

        for id in ids {
            let Some(info) = providers.get_mut(id) else {
                accounting.missing.push(id.clone());
                continue;
            };

            if info.status != ProviderStatus::Busy {
                // Re-registered mid-round; it no longer owes this round
                accounting.missing.push(id.clone());
                continue;
            }

            if charge {
                info.charge_minutes(minutes);
            }
            info.rounds_participated += 1;

            if info.availability_minutes == 0 {
                if let Err(err) = Self::apply_transition(info, ProviderStatus::Exhausted) {
                    tracing::warn!(provider_id = %id, %err, "exhaustion transition rejected");
                    continue;
                }
                providers.remove(id);
                accounting.exhausted.push(id.clone());
            } else {
                if let Err(err) = Self::apply_transition(info, ProviderStatus::Idle) {
                    tracing::warn!(provider_id = %id, %err, "idle transition rejected");
                    continue;
                }
                accounting.idle.push(id.clone());
            }
        }

        accounting
    }

    /// Evict providers whose last heartbeat is older than the window
    ///
    /// Ids in `protected` are exempt for this sweep. Returns the removed
    /// entries so the caller can log heartbeat ages.
    pub async fn evict_stale(
        &self,
        now: DateTime<Utc>,
        staleness: chrono::Duration,
        protected: &HashSet<String>,
    ) -> Vec<ProviderInfo> {
        let mut providers = self.providers.write().await;

        let stale_ids: Vec<String> = providers
            .values()
            .filter(|info| info.is_stale(now, staleness) && !protected.contains(&info.id))
            .map(|info| info.id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(mut info) = providers.remove(&id) {
                if let Err(err) = Self::apply_transition(&mut info, ProviderStatus::Offline) {
                    tracing::warn!(provider_id = %id, %err, "offline transition rejected");
                }
                evicted.push(info);
            }
        }

        evicted
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let providers = self.providers.read().await;

        let mut idle = 0;
        let mut busy = 0;
        let mut total_availability_minutes = 0;
        let mut total_rounds_participated = 0;

        for info in providers.values() {
            match info.status {
                ProviderStatus::Idle => idle += 1,
                ProviderStatus::Busy => busy += 1,
                _ => {}
            }
            total_availability_minutes += info.availability_minutes;
            total_rounds_participated += info.rounds_participated;
        }

        RegistryStats {
            total_providers: providers.len(),
            idle,
            busy,
            total_availability_minutes,
            total_rounds_participated,
        }
    }

    /// Apply a status change through the transition table
    fn apply_transition(
        info: &mut ProviderInfo,
        next: ProviderStatus,
    ) -> Result<(), RegistryError> {
        if !info.status.can_transition(next) {
            return Err(RegistryError::InvalidTransition {
                id: info.id.clone(),
                from: info.status,
                to: next,
            });
        }
        info.status = next;
        Ok(())
    }
}

// ============================================================================
// Round Accounting
// ============================================================================

/// Outcome of settling a round's participants
#[derive(Debug, Clone, Default)]
pub struct RoundAccounting {
    /// Participants returned to the idle pool
    pub idle: Vec<String>,

    /// Participants removed with a depleted budget
    pub exhausted: Vec<String>,

    /// Participants no longer accountable (evicted or re-registered)
    pub missing: Vec<String>,
}

impl RoundAccounting {
    /// Participants that were actually settled
    pub fn settled(&self) -> usize {
        self.idle.len() + self.exhausted.len()
    }
}

// ============================================================================
// Registry Stats
// ============================================================================

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_providers: usize,
    pub idle: usize,
    pub busy: usize,
    pub total_availability_minutes: u64,
    pub total_rounds_participated: u64,
}

impl RegistryStats {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Fleet Stats\n\
             {:-<30}\n\
             Total Providers: {}\n\
             - Idle: {}\n\
             - Busy: {}\n\
             Remaining Budget: {} min\n\
             Completed Participations: {}",
            "",
            self.total_providers,
            self.idle,
            self.busy,
            self.total_availability_minutes,
            self.total_rounds_participated
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// Provider id is not in the registry
    UnknownProvider(String),

    /// Registry at capacity
    CapacityExceeded { current: usize, max: usize },

    /// Status change not in the transition table
    InvalidTransition {
        id: String,
        from: ProviderStatus,
        to: ProviderStatus,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProvider(id) => write!(f, "Provider not registered: {}", id),
            Self::CapacityExceeded { current, max } => {
                write!(f, "Registry at capacity: {}/{}", current, max)
            }
            Self::InvalidTransition { id, from, to } => {
                write!(f, "Invalid transition for {}: {} -> {}", id, from, to)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ============================================================================
// Tests
// ============================================================================
