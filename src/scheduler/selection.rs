//! Round participant selection
//!
//! Selection is a pure function over a registry snapshot: no clock
//! reads, no side effects, and a total ordering that makes the result
//! reproducible for identical inputs. The round driver turns the
//! returned candidates into Busy claims; this code never touches the
//! registry itself.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::fleet::provider::ProviderInfo;
use crate::scheduler::gpu::GpuPowerTable;

// ============================================================================
// Selection Parameters
// ============================================================================

/// Inputs to one selection pass
#[derive(Debug, Clone)]
pub struct SelectionParams<'a> {
    /// Fleet-per-round cap
    pub max_count: usize,

    /// Budget charged per round, the denominator of the availability ratio
    pub round_duration_minutes: u64,

    /// Heartbeat staleness window
    pub staleness: chrono::Duration,

    /// GPU scoring table
    pub gpu_power: &'a GpuPowerTable,
}

/// A provider chosen for the next round, with its ranking score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f64,
}

// ============================================================================
// Selection
// ============================================================================

/// Composite ranking score for one provider
///
/// `reliability * gpu_power * min(availability / round_duration, 1.0)`.
/// The availability ratio discounts providers that cannot cover a full
/// round; anything at or above one round's budget scores the same.
pub fn composite_score(info: &ProviderInfo, params: &SelectionParams) -> f64 {
    let availability_ratio = if params.round_duration_minutes == 0 {
        1.0
    } else {
        (info.availability_minutes as f64 / params.round_duration_minutes as f64).min(1.0)
    };

    info.reliability_score * params.gpu_power.score(&info.capabilities.gpu_model) * availability_ratio
}

/// Select providers for the next round
///
/// Filters the snapshot to currently eligible providers, ranks them by
/// composite score (descending, ties broken by ascending id), and caps
/// the result at `max_count`. An empty result is a normal outcome
/// meaning "nobody eligible this attempt".
pub fn select_for_round(
    snapshot: &[ProviderInfo],
    now: DateTime<Utc>,
    params: &SelectionParams,
) -> Vec<ScoredCandidate> {
    let mut candidates: Vec<ScoredCandidate> = snapshot
        .iter()
        .filter(|info| info.is_selectable(now, params.staleness))
        .map(|info| ScoredCandidate {
            id: info.id.clone(),
            score: composite_score(info, params),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    candidates.truncate(params.max_count);
    candidates
}

// ============================================================================
// Tests
// ============================================================================
