//! Aggregation trigger
//!
//! The coordinator never averages model weights itself. When a round's
//! deadline passes, the round driver hands the collected update
//! references to an [`Aggregator`], awaits the outcome, and settles the
//! round on success or failure. The shipped implementation runs the
//! configured external command ([`ProcessAggregator`]); tests swap in
//! recording fakes behind the same trait.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod process;

pub use process::ProcessAggregator;

// ============================================================================
// Request / Outcome
// ============================================================================

/// Everything an aggregator needs to merge one round
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    /// Round being merged
    pub ordinal: u64,

    /// Latest global model, if any round has completed before
    pub global_model: Option<PathBuf>,

    /// Update artifacts collected for this round
    pub update_refs: Vec<PathBuf>,

    /// Directory holding global model artifacts
    pub model_dir: PathBuf,

    /// Directory holding provider update artifacts
    pub updates_dir: PathBuf,
}

/// Result of a successful aggregation
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    /// Round that was merged
    pub ordinal: u64,

    /// Artifact produced for this round
    pub artifact: PathBuf,

    /// Number of provider updates that went in
    pub update_count: usize,

    /// Wall time the aggregation took
    pub elapsed: Duration,
}

// ============================================================================
// Errors
// ============================================================================

/// Aggregation failures
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Failed to spawn aggregation command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Aggregation process exited with status {code:?}")]
    ProcessFailed { code: Option<i32> },

    #[error("Aggregation produced no artifact at {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("Aggregation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Aggregation I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AggregationError {
    /// Whether retrying the same round could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }
}

// ============================================================================
// Aggregator Trait
// ============================================================================

/// Interface to the external aggregation computation
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Merge the round's updates into a new global model artifact
    async fn aggregate(
        &self,
        request: AggregationRequest,
    ) -> Result<AggregationOutcome, AggregationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = AggregationError::Timeout { timeout_secs: 30 };
        assert!(timeout.is_transient());

        let failed = AggregationError::ProcessFailed { code: Some(1) };
        assert!(!failed.is_transient());

        let missing = AggregationError::MissingArtifact {
            path: PathBuf::from("/tmp/round-1.pt"),
        };
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = AggregationError::ProcessFailed { code: Some(3) };
        assert!(err.to_string().contains("Some(3)"));

        let err = AggregationError::Timeout { timeout_secs: 30 };
        assert_eq!(err.to_string(), "Aggregation timed out after 30s");
    }
}
