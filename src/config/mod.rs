//! Configuration management for the muster coordinator
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Fleet registry and heartbeat configuration
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Round lifecycle configuration
    #[serde(default)]
    pub round: RoundConfig,

    /// Provider selection configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Artifact storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// External aggregation process configuration
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Identity verification configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Provider profile store configuration
    #[serde(default)]
    pub profiles: ProfilesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Enable permissive CORS (for dashboards)
    pub enable_cors: bool,

    /// Enable per-request tracing
    pub enable_request_logging: bool,
}

/// Fleet registry and heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Seconds without a heartbeat before a provider is presumed offline
    pub staleness_secs: u64,

    /// Interval between offline sweeps, in seconds
    pub sweep_interval_secs: u64,

    /// Maximum number of registered providers
    pub max_providers: usize,

    /// Exempt current round participants from staleness eviction
    pub protect_active_participants: bool,
}

/// Round lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Wall-clock length of a round, in seconds
    pub timeout_secs: u64,

    /// Compute budget charged per round, in minutes
    pub duration_minutes: u64,

    /// Maximum providers selected per round
    pub max_per_round: usize,

    /// Retry interval when no providers are eligible, in seconds
    pub empty_backoff_secs: u64,

    /// Delay before the first selection attempt, in seconds
    pub startup_grace_secs: u64,

    /// Skip the availability charge when aggregation fails
    pub refund_on_failure: bool,
}

/// Provider selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// GPU model substring -> power score
    pub gpu_scores: BTreeMap<String, f64>,

    /// Score for hardware not matching any table entry
    pub default_gpu_score: f64,
}

/// Artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for model and update artifacts
    pub root: PathBuf,
}

/// Command line for an external process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,

    /// Leading arguments (the coordinator appends its own)
    #[serde(default)]
    pub args: Vec<String>,
}

/// External aggregation process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Aggregation command; `<model_dir> <updates_dir> <round>` are appended
    pub command: CommandSpec,

    /// Abort aggregation after this many seconds (unset: wait forever)
    pub timeout_secs: Option<u64>,

    /// Command run once at startup when no global model exists;
    /// `<model_dir>` is appended
    pub bootstrap: Option<CommandSpec>,
}

/// Identity verification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token -> provider subject id
    pub tokens: BTreeMap<String, String>,
}

/// Provider profile store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// JSON document holding pre-provisioned profiles; unset uses an
    /// empty in-memory store (registrations will be rejected)
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MUSTER_HOST") {
            config.server.host = host;
        }

        if let Some(port) = std::env::var("MUSTER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.server.port = port;
        }

        if let Some(staleness) = std::env::var("MUSTER_STALENESS_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.fleet.staleness_secs = staleness;
        }

        if let Some(timeout) = std::env::var("MUSTER_ROUND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.round.timeout_secs = timeout;
        }

        if let Some(max) = std::env::var("MUSTER_MAX_PER_ROUND")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.round.max_per_round = max;
        }

        if let Ok(root) = std::env::var("MUSTER_STORAGE_ROOT") {
            config.storage.root = PathBuf::from(root);
        }

        if let Ok(path) = std::env::var("MUSTER_PROFILES_PATH") {
            config.profiles.path = Some(PathBuf::from(path));
        }

        if let Ok(level) = std::env::var("MUSTER_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(format) = std::env::var("MUSTER_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Serialize the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be greater than 0");
        }

        if self.fleet.staleness_secs == 0 {
            anyhow::bail!("fleet.staleness_secs must be greater than 0");
        }

        if self.fleet.sweep_interval_secs == 0 {
            anyhow::bail!("fleet.sweep_interval_secs must be greater than 0");
        }

        if self.fleet.max_providers == 0 {
            anyhow::bail!("fleet.max_providers must be greater than 0");
        }

        if self.round.timeout_secs == 0 {
            anyhow::bail!("round.timeout_secs must be greater than 0");
        }

        if self.round.duration_minutes == 0 {
            anyhow::bail!("round.duration_minutes must be greater than 0");
        }

        if self.round.max_per_round == 0 {
            anyhow::bail!("round.max_per_round must be greater than 0");
        }

        if self.scheduler.default_gpu_score <= 0.0 {
            anyhow::bail!("scheduler.default_gpu_score must be positive");
        }

        for (pattern, score) in &self.scheduler.gpu_scores {
            if *score <= 0.0 {
                anyhow::bail!("scheduler.gpu_scores[{pattern}] must be positive");
            }
        }

        if self.aggregation.command.program.is_empty() {
            anyhow::bail!("aggregation.command.program must not be empty");
        }

        Ok(())
    }

    /// Get the server bind address
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl FleetConfig {
    /// Staleness window as a chrono duration, for timestamp comparisons
    #[must_use]
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_secs as i64)
    }

    /// Sweep interval as a std duration, for tickers
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RoundConfig {
    /// Round deadline length
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff when no providers are eligible
    #[must_use]
    pub fn empty_backoff(&self) -> Duration {
        Duration::from_secs(self.empty_backoff_secs)
    }

    /// Grace period before the first selection attempt
    #[must_use]
    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
}

impl StorageConfig {
    /// Directory holding global model artifacts
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.root.join("global-models")
    }

    /// Directory holding provider update artifacts
    #[must_use]
    pub fn updates_dir(&self) -> PathBuf {
        self.root.join("provider-updates")
    }
}

impl AggregationConfig {
    /// Aggregation timeout, if configured
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 7000,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 12,
            sweep_interval_secs: 5,
            max_providers: 256,
            protect_active_participants: false,
        }
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            duration_minutes: 5,
            max_per_round: 2,
            empty_backoff_secs: 5,
            startup_grace_secs: 3,
            refund_on_failure: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let mut gpu_scores = BTreeMap::new();
        gpu_scores.insert(String::from("4090"), 1.0);
        gpu_scores.insert(String::from("3090"), 0.9);
        gpu_scores.insert(String::from("3080"), 0.8);
        gpu_scores.insert(String::from("3070"), 0.7);
        gpu_scores.insert(String::from("3060"), 0.6);

        Self {
            gpu_scores,
            default_gpu_score: 0.5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            command: CommandSpec {
                program: String::from("python3"),
                args: vec![String::from("scripts/aggregate.py")],
            },
            timeout_secs: None,
            bootstrap: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("pretty"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            fleet: FleetConfig::default(),
            round: RoundConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
            aggregation: AggregationConfig::default(),
            auth: AuthConfig::default(),
            profiles: ProfilesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_round_timeout() {
        let mut config = Config::default();
        config.round.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_gpu_score() {
        let mut config = Config::default();
        config
            .scheduler
            .gpu_scores
            .insert(String::from("1080"), -0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timing_conversions() {
        let config = Config::default();
        assert_eq!(config.round.timeout(), Duration::from_secs(15));
        assert_eq!(config.fleet.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.fleet.staleness(), chrono::Duration::seconds(12));
    }

    #[test]
    fn test_storage_layout() {
        let config = Config::default();
        assert_eq!(config.storage.model_dir(), PathBuf::from("storage/global-models"));
        assert_eq!(
            config.storage.updates_dir(),
            PathBuf::from("storage/provider-updates")
        );
    }

    #[test]
    fn test_partial_toml_round_trip() {
        let toml_src = r#"
            [server]
            host = "127.0.0.1"
            port = 7100
            enable_cors = false
            enable_request_logging = true

            [round]
            timeout_secs = 30
            duration_minutes = 10
            max_per_round = 4
            empty_backoff_secs = 5
            startup_grace_secs = 3
            refund_on_failure = true
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.round.max_per_round, 4);
        assert!(config.round.refund_on_failure);
        // untouched sections fall back to defaults
        assert_eq!(config.fleet.staleness_secs, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_gpu_table_scenario_scores() {
        let config = SchedulerConfig::default();
        assert_eq!(config.gpu_scores.get("4090"), Some(&1.0));
        assert_eq!(config.gpu_scores.get("3060"), Some(&0.6));
    }
}
