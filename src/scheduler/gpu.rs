//! GPU power scoring
//!
//! Maps reported GPU model strings onto a relative power factor used in
//! the composite selection score. The table lives in configuration, not
//! code: operators tune it as new hardware shows up, and unrecognized
//! models fall back to a configured default.

use std::collections::BTreeMap;

use crate::config::SchedulerConfig;

// ============================================================================
// GPU Power Table
// ============================================================================

/// Substring-matched lookup from GPU model to power score
#[derive(Debug, Clone)]
pub struct GpuPowerTable {
    /// Lowercased substring -> score, in deterministic order
    entries: Vec<(String, f64)>,

    /// Score for models matching no entry
    default_score: f64,
}

impl GpuPowerTable {
    /// Build a table from raw entries and a default
    pub fn new(scores: &BTreeMap<String, f64>, default_score: f64) -> Self {
        let entries = scores
            .iter()
            .map(|(pattern, score)| (pattern.to_lowercase(), *score))
            .collect();

        Self {
            entries,
            default_score,
        }
    }

    /// Build the table from scheduler configuration
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(&config.gpu_scores, config.default_gpu_score)
    }

    /// Score a reported GPU model
    ///
    /// Matching is case-insensitive substring containment; the first
    /// matching entry in table order wins.
    pub fn score(&self, gpu_model: &str) -> f64 {
        let model = gpu_model.to_lowercase();

        self.entries
            .iter()
            .find(|(pattern, _)| model.contains(pattern.as_str()))
            .map(|(_, score)| *score)
            .unwrap_or(self.default_score)
    }

    /// Number of configured entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GpuPowerTable {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        let table = GpuPowerTable::default();

        assert_eq!(table.score("NVIDIA GeForce RTX 4090"), 1.0);
        assert_eq!(table.score("RTX 3060"), 0.6);
        assert_eq!(table.score("rtx 3090 Ti"), 0.9);
    }

    #[test]
    fn test_unknown_model_gets_default() {
        let table = GpuPowerTable::default();

        assert_eq!(table.score("Intel Arc A770"), 0.5);
        assert_eq!(table.score("unknown"), 0.5);
        assert_eq!(table.score(""), 0.5);
    }

    #[test]
    fn test_case_insensitive_substring_match() {
        let mut scores = BTreeMap::new();
        scores.insert(String::from("A100"), 1.0);
        let table = GpuPowerTable::new(&scores, 0.3);

        assert_eq!(table.score("nvidia a100-sxm4-80gb"), 1.0);
        assert_eq!(table.score("NVIDIA H200"), 0.3);
    }

    #[test]
    fn test_table_size() {
        let table = GpuPowerTable::default();
        assert_eq!(table.len(), 5);
        assert!(!table.is_empty());
    }
}
