//! Prometheus metrics for the muster coordinator
//!
//! This module provides metrics tracking for:
//! - Fleet: registrations, heartbeats, evictions, live provider gauge
//! - Rounds: completions, empty selections, aggregation outcomes, stored updates
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for fleet-side metrics
struct FleetMetrics {
    live_providers: Gauge,
    registrations: Counter,
    heartbeats: Counter,
    evictions: Counter,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Container for round-lifecycle metrics
struct RoundMetrics {
    current_round: Gauge,
    rounds_completed: Counter,
    empty_selections: Counter,
    aggregation_failures: Counter,
    aggregation_duration: Histogram,
    updates_stored: Counter,
    update_bytes: Counter,
}

/// Global storage for fleet metrics
static FLEET_METRICS: OnceLock<FleetMetrics> = OnceLock::new();

/// Global storage for round metrics
static ROUND_METRICS: OnceLock<RoundMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let fleet = FleetMetrics {
        live_providers: register_gauge!(
            "muster_fleet_live_providers",
            "Number of providers currently in the registry"
        )?,
        registrations: register_counter!(
            "muster_fleet_registrations_total",
            "Total successful provider registrations"
        )?,
        heartbeats: register_counter!(
            "muster_fleet_heartbeats_total",
            "Total heartbeats received"
        )?,
        evictions: register_counter!(
            "muster_fleet_evictions_total",
            "Total providers evicted for missed heartbeats"
        )?,
        api_requests: register_counter_vec!(
            "muster_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "muster_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let round = RoundMetrics {
        current_round: register_gauge!(
            "muster_round_current",
            "Ordinal of the current round (0 before the first activation)"
        )?,
        rounds_completed: register_counter!(
            "muster_rounds_completed_total",
            "Total rounds that reached settlement"
        )?,
        empty_selections: register_counter!(
            "muster_round_empty_selections_total",
            "Total activation attempts that selected no providers"
        )?,
        aggregation_failures: register_counter!(
            "muster_aggregation_failures_total",
            "Total aggregation attempts that failed"
        )?,
        aggregation_duration: register_histogram!(
            "muster_aggregation_duration_seconds",
            "Aggregation process duration in seconds",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
        )?,
        updates_stored: register_counter!(
            "muster_updates_stored_total",
            "Total provider update artifacts stored"
        )?,
        update_bytes: register_counter!(
            "muster_update_bytes_total",
            "Total bytes of provider updates stored"
        )?,
    };

    FLEET_METRICS
        .set(fleet)
        .map_err(|_| "Fleet metrics already initialized")?;
    ROUND_METRICS
        .set(round)
        .map_err(|_| "Round metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    FLEET_METRICS.get().is_some() && ROUND_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Set the live provider gauge
pub fn set_live_providers(count: i64) {
    if let Some(m) = FLEET_METRICS.get() {
        m.live_providers.set(count as f64);
    }
}

/// Record a successful registration
pub fn record_registration() {
    if let Some(m) = FLEET_METRICS.get() {
        m.registrations.inc();
    }
}

/// Record a heartbeat
pub fn record_heartbeat() {
    if let Some(m) = FLEET_METRICS.get() {
        m.heartbeats.inc();
    }
}

/// Record providers evicted in one sweep
pub fn record_evictions(count: u64) {
    if let Some(m) = FLEET_METRICS.get() {
        if count > 0 {
            m.evictions.inc_by(count as f64);
        }
    }
}

/// Record a completed API request
pub fn record_api_request(endpoint: &str, status: u16) {
    if let Some(m) = FLEET_METRICS.get() {
        let status_str = status.to_string();
        m.api_requests
            .with_label_values(&[endpoint, &status_str])
            .inc();
    }
}

/// Set the current round gauge
pub fn set_current_round(ordinal: u64) {
    if let Some(m) = ROUND_METRICS.get() {
        m.current_round.set(ordinal as f64);
    }
}

/// Record a round reaching settlement
pub fn record_round_completed() {
    if let Some(m) = ROUND_METRICS.get() {
        m.rounds_completed.inc();
    }
}

/// Record an activation attempt that found no eligible providers
pub fn record_empty_selection() {
    if let Some(m) = ROUND_METRICS.get() {
        m.empty_selections.inc();
    }
}

/// Record an aggregation attempt
pub fn record_aggregation(duration_secs: f64, failed: bool) {
    let Some(m) = ROUND_METRICS.get() else {
        return;
    };

    m.aggregation_duration.observe(duration_secs);
    if failed {
        m.aggregation_failures.inc();
    }
}

/// Record a stored provider update
pub fn record_update_stored(bytes: usize) {
    let Some(m) = ROUND_METRICS.get() else {
        return;
    };

    m.updates_stored.inc();
    m.update_bytes.inc_by(bytes as f64);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an API request timer for an endpoint
pub fn start_api_timer(endpoint: &str) -> MetricsTimer {
    match FLEET_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.api_duration
                .with_label_values(&[endpoint])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
