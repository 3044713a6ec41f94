//! Artifact storage for global models and provider updates
//!
//! Layout under the configured storage root:
//!
//! ```text
//! <root>/global-models/round-{N}.pt
//! <root>/provider-updates/round-{R}-{providerId}.pt
//! ```
//!
//! The store owns the filename conventions. Uploads land here from the
//! HTTP surface, the round driver collects a round's update refs before
//! aggregation and purges them after the round settles, and
//! `/model/latest` serves whatever [`ArtifactStore::latest_global`]
//! resolves.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, StorageConfig};

const MODEL_DIR: &str = "global-models";
const UPDATES_DIR: &str = "provider-updates";
const ARTIFACT_EXT: &str = ".pt";

// ============================================================================
// Filename Conventions
// ============================================================================

/// Filename of the global model artifact for a round
pub fn global_model_filename(ordinal: u64) -> String {
    format!("round-{ordinal}{ARTIFACT_EXT}")
}

/// Filename of one provider's update artifact for a round
pub fn update_filename(ordinal: u64, provider_id: &str) -> String {
    format!("round-{ordinal}-{provider_id}{ARTIFACT_EXT}")
}

/// Provider ids become part of stored filenames, so only a conservative
/// character set is accepted (no path separators, no empty names)
pub fn is_valid_provider_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn parse_global_ordinal(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("round-")?
        .strip_suffix(ARTIFACT_EXT)?
        .parse()
        .ok()
}

// ============================================================================
// Errors
// ============================================================================

/// Artifact storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid provider id '{0}' for stored artifact")]
    InvalidProviderId(String),

    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model bootstrap command '{program}' exited with status {code:?}")]
    BootstrapFailed { program: String, code: Option<i32> },
}

impl StorageError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// Artifact Counts
// ============================================================================

/// Current artifact totals, for the operator stats endpoint
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ArtifactCounts {
    pub global_models: usize,
    pub provider_updates: usize,
}

// ============================================================================
// Artifact Store
// ============================================================================

/// Filesystem-backed store for model artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    model_dir: PathBuf,
    updates_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store, ensuring both artifact directories exist
    pub fn new(root: &Path) -> Result<Self, StorageError> {
        let model_dir = root.join(MODEL_DIR);
        let updates_dir = root.join(UPDATES_DIR);

        std::fs::create_dir_all(&model_dir)
            .map_err(|e| StorageError::io("create directory", &model_dir, e))?;
        std::fs::create_dir_all(&updates_dir)
            .map_err(|e| StorageError::io("create directory", &updates_dir, e))?;

        Ok(Self {
            model_dir,
            updates_dir,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(&config.root)
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn updates_dir(&self) -> &Path {
        &self.updates_dir
    }

    /// Path of the global model artifact for a round
    pub fn global_path(&self, ordinal: u64) -> PathBuf {
        self.model_dir.join(global_model_filename(ordinal))
    }

    /// Resolve the highest-numbered global model artifact, if any
    pub async fn latest_global(&self) -> Result<Option<(u64, PathBuf)>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.model_dir)
            .await
            .map_err(|e| StorageError::io("read directory", &self.model_dir, e))?;

        let mut latest: Option<(u64, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io("read directory", &self.model_dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(ordinal) = parse_global_ordinal(name) else {
                continue;
            };
            if latest.as_ref().map_or(true, |(best, _)| ordinal > *best) {
                latest = Some((ordinal, entry.path()));
            }
        }

        Ok(latest)
    }

    /// Store one provider's update blob for a round
    ///
    /// Accepts any round ordinal; whether the update makes it into an
    /// aggregation depends on which round the driver collects next.
    pub async fn store_update(
        &self,
        ordinal: u64,
        provider_id: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        if !is_valid_provider_id(provider_id) {
            return Err(StorageError::InvalidProviderId(provider_id.to_string()));
        }

        let path = self.updates_dir.join(update_filename(ordinal, provider_id));
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::io("write", &path, e))?;

        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = format!("{:x}", hasher.finalize());

        debug!(
            provider = %provider_id,
            round = ordinal,
            bytes = data.len(),
            sha256 = %digest,
            "Stored provider update"
        );

        Ok(path)
    }

    /// List the update artifacts stored for a round, sorted by filename
    pub async fn update_refs(&self, ordinal: u64) -> Result<Vec<PathBuf>, StorageError> {
        let prefix = format!("round-{ordinal}-");
        let mut refs = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.updates_dir)
            .await
            .map_err(|e| StorageError::io("read directory", &self.updates_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io("read directory", &self.updates_dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(ARTIFACT_EXT) {
                refs.push(entry.path());
            }
        }

        refs.sort();
        Ok(refs)
    }

    /// Delete a round's update artifacts, returning how many went away
    ///
    /// Individual deletion failures are logged and skipped so one stuck
    /// file cannot wedge round settlement.
    pub async fn purge_updates(&self, ordinal: u64) -> Result<usize, StorageError> {
        let refs = self.update_refs(ordinal).await?;
        let mut removed = 0;

        for path in &refs {
            match tokio::fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to purge {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            debug!(round = ordinal, removed, "Purged consumed updates");
        }
        Ok(removed)
    }

    /// Count stored artifacts of both kinds
    pub async fn counts(&self) -> Result<ArtifactCounts, StorageError> {
        Ok(ArtifactCounts {
            global_models: count_files(&self.model_dir).await?,
            provider_updates: count_files(&self.updates_dir).await?,
        })
    }

    /// Run the configured bootstrap command if no global model exists yet
    ///
    /// The command gets the model directory appended as its final
    /// argument and is expected to write an initial `round-0` artifact.
    pub async fn bootstrap_if_empty(
        &self,
        bootstrap: Option<&CommandSpec>,
    ) -> Result<Option<(u64, PathBuf)>, StorageError> {
        if let Some(latest) = self.latest_global().await? {
            debug!("Global model already present: {}", latest.1.display());
            return Ok(Some(latest));
        }

        let Some(spec) = bootstrap else {
            info!("No global model present yet and no bootstrap command configured");
            return Ok(None);
        };

        info!("Bootstrapping initial global model via '{}'", spec.program);

        let output = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .arg(&self.model_dir)
            .output()
            .await
            .map_err(|e| StorageError::io("spawn", Path::new(&spec.program), e))?;

        if !output.stdout.is_empty() {
            debug!(
                "bootstrap stdout: {}",
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }

        if !output.status.success() {
            warn!(
                "bootstrap stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
            return Err(StorageError::BootstrapFailed {
                program: spec.program.clone(),
                code: output.status.code(),
            });
        }

        self.latest_global().await
    }
}

async fn count_files(dir: &Path) -> Result<usize, StorageError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StorageError::io("read directory", dir, e))?;

    let mut count = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io("read directory", dir, e))?
    {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            count += 1;
        }
    }
    Ok(count)
}

// ============================================================================
// Tests
// ============================================================================
