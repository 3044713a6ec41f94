//! Provider state and hardware descriptors
//!
//! A provider is a volunteer machine offering a bounded compute budget.
//! Its lifecycle is a closed state machine: profile states before it
//! joins the live fleet, live states while it is registered, and
//! terminal states applied at the moment it leaves.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Status
// ============================================================================

/// Status of a provider, across profile and fleet lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    /// Profile exists but no availability has been pledged
    Registered,

    /// Profile pledged availability and may join the fleet
    Ready,

    /// In the fleet, waiting for selection
    Idle,

    /// Participating in the current round
    Busy,

    /// Presumed dead after missing heartbeats; removed from the fleet
    Offline,

    /// Compute budget depleted; removed from the fleet
    Exhausted,
}

impl ProviderStatus {
    /// Check whether the scheduler may consider this provider
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check whether the provider is a live fleet member
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }

    /// Check whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Offline | Self::Exhausted)
    }

    /// Validated transition table
    ///
    /// Only these edges exist:
    /// `Registered -> Ready -> Idle <-> Busy`, with `Offline` reachable
    /// from either live state and `Exhausted` reachable from `Busy`.
    pub fn can_transition(&self, next: ProviderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Registered, Self::Ready)
                | (Self::Ready, Self::Idle)
                | (Self::Idle, Self::Busy)
                | (Self::Idle, Self::Offline)
                | (Self::Busy, Self::Idle)
                | (Self::Busy, Self::Exhausted)
                | (Self::Busy, Self::Offline)
        )
    }
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self::Registered
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Registered => "REGISTERED",
            Self::Ready => "READY",
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Offline => "OFFLINE",
            Self::Exhausted => "EXHAUSTED",
        };
        write!(f, "{label}")
    }
}

// ============================================================================
// Hardware Profile
// ============================================================================

fn default_gpu_model() -> String {
    String::from("unknown")
}

/// Hardware reported by a provider at registration
///
/// Informational only; the scheduler reads `gpu_model` for scoring and
/// nothing else interprets these fields. Wire names follow the provider
/// system probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// GPU model string as reported by the driver
    #[serde(rename = "gpu", default = "default_gpu_model")]
    pub gpu_model: String,

    /// GPU memory in GB
    #[serde(rename = "vram", default)]
    pub vram_gb: u32,

    /// Logical CPU cores
    #[serde(rename = "cpuCores", default)]
    pub cpu_cores: u32,

    /// System memory in GB
    #[serde(rename = "ramGB", default)]
    pub ram_gb: u32,
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self {
            gpu_model: default_gpu_model(),
            vram_gb: 0,
            cpu_cores: 0,
            ram_gb: 0,
        }
    }
}

// ============================================================================
// Provider Info
// ============================================================================

/// A live fleet entry for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Stable identifier (subject of the verified identity)
    pub id: String,

    /// Reported hardware
    pub capabilities: HardwareProfile,

    /// Remaining compute budget in minutes; never increases
    pub availability_minutes: u64,

    /// Reliability factor in [0,1], owned by the profile store
    pub reliability_score: f64,

    /// Current status
    pub status: ProviderStatus,

    /// When the provider joined the fleet
    pub registered_at: DateTime<Utc>,

    /// Last heartbeat or registration
    pub last_seen: DateTime<Utc>,

    /// Last round participation (diagnostic)
    pub last_scheduled_at: Option<DateTime<Utc>>,

    /// Completed round participations (diagnostic)
    pub rounds_participated: u64,
}

impl ProviderInfo {
    /// Create a fleet entry for a provider whose profile was accepted
    pub fn new(
        id: impl Into<String>,
        capabilities: HardwareProfile,
        availability_minutes: u64,
        reliability_score: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            capabilities,
            availability_minutes,
            reliability_score,
            status: ProviderStatus::Idle,
            registered_at: now,
            last_seen: now,
            last_scheduled_at: None,
            rounds_participated: 0,
        }
    }

    /// Record a heartbeat
    pub fn update_heartbeat(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Check staleness against an explicit clock reading
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_seen > window
    }

    /// Seconds since the last heartbeat
    pub fn seconds_since_seen(&self) -> i64 {
        (Utc::now() - self.last_seen).num_seconds()
    }

    /// Check whether the scheduler may pick this provider right now
    pub fn is_selectable(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.status.is_selectable()
            && self.availability_minutes > 0
            && !self.is_stale(now, staleness)
    }

    /// Charge one round of participation against the budget
    pub fn charge_minutes(&mut self, minutes: u64) {
        self.availability_minutes = self.availability_minutes.saturating_sub(minutes);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider(id: &str) -> ProviderInfo {
        ProviderInfo::new(
            id,
            HardwareProfile {
                gpu_model: "RTX 4090".to_string(),
                vram_gb: 24,
                cpu_cores: 16,
                ram_gb: 64,
            },
            20,
            1.0,
        )
    }

    #[test]
    fn test_status_transitions() {
        use ProviderStatus::*;

        assert!(Registered.can_transition(Ready));
        assert!(Ready.can_transition(Idle));
        assert!(Idle.can_transition(Busy));
        assert!(Busy.can_transition(Idle));
        assert!(Busy.can_transition(Exhausted));
        assert!(Idle.can_transition(Offline));
        assert!(Busy.can_transition(Offline));

        // no shortcuts and no resurrection
        assert!(!Registered.can_transition(Idle));
        assert!(!Ready.can_transition(Busy));
        assert!(!Idle.can_transition(Exhausted));
        assert!(!Offline.can_transition(Idle));
        assert!(!Exhausted.can_transition(Idle));
    }

    #[test]
    fn test_status_predicates() {
        assert!(ProviderStatus::Idle.is_selectable());
        assert!(!ProviderStatus::Busy.is_selectable());
        assert!(ProviderStatus::Busy.is_live());
        assert!(ProviderStatus::Exhausted.is_terminal());
        assert!(!ProviderStatus::Idle.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ProviderStatus::Ready).unwrap();
        assert_eq!(json, "\"READY\"");

        let parsed: ProviderStatus = serde_json::from_str("\"EXHAUSTED\"").unwrap();
        assert_eq!(parsed, ProviderStatus::Exhausted);
    }

    #[test]
    fn test_hardware_profile_wire_names() {
        let body = r#"{"gpu":"RTX 3060","vram":12,"cpuCores":8,"ramGB":32}"#;
        let hw: HardwareProfile = serde_json::from_str(body).unwrap();
        assert_eq!(hw.gpu_model, "RTX 3060");
        assert_eq!(hw.vram_gb, 12);
        assert_eq!(hw.cpu_cores, 8);
        assert_eq!(hw.ram_gb, 32);
    }

    #[test]
    fn test_hardware_profile_defaults_missing_fields() {
        let hw: HardwareProfile = serde_json::from_str("{}").unwrap();
        assert_eq!(hw.gpu_model, "unknown");
        assert_eq!(hw.vram_gb, 0);
    }

    #[test]
    fn test_new_provider_is_idle_and_fresh() {
        let p = make_provider("p1");
        assert_eq!(p.status, ProviderStatus::Idle);
        assert!(p.is_selectable(Utc::now(), Duration::seconds(12)));
        assert!(p.seconds_since_seen() < 2);
    }

    #[test]
    fn test_staleness() {
        let p = make_provider("p1");
        let later = Utc::now() + Duration::seconds(30);
        assert!(p.is_stale(later, Duration::seconds(12)));
        assert!(!p.is_selectable(later, Duration::seconds(12)));
    }

    #[test]
    fn test_charge_saturates() {
        let mut p = make_provider("p1");
        p.charge_minutes(5);
        assert_eq!(p.availability_minutes, 15);
        p.charge_minutes(100);
        assert_eq!(p.availability_minutes, 0);
        assert!(!p.is_selectable(Utc::now(), Duration::seconds(12)));
    }
}
