//! Provider profile store
//!
//! Profiles are provisioned outside the coordinator (the upstream
//! system keeps them in a managed document store) and consulted at
//! registration time: no profile means the provider is unknown, a
//! profile that is not `READY` means it may not join the fleet. The
//! coordinator writes profiles in exactly one case, zeroing out a
//! provider whose availability budget is spent.
//!
//! Document shape, field names as the upstream service stores them:
//!
//! ```json
//! { "availabilityMinutes": 480, "reliabilityScore": 0.97, "status": "READY" }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ============================================================================
// Profile Types
// ============================================================================

/// Lifecycle state of a provider's profile document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileStatus {
    /// Enrolled but not yet cleared to join rounds
    Registered,

    /// Availability declared, allowed to register with the coordinator
    Ready,

    /// Availability budget spent
    Exhausted,
}

impl Default for ProfileStatus {
    fn default() -> Self {
        Self::Registered
    }
}

impl std::fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Registered => "REGISTERED",
            Self::Ready => "READY",
            Self::Exhausted => "EXHAUSTED",
        };
        write!(f, "{label}")
    }
}

/// One provider's profile document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    /// Document key; not serialized, the store fills it on fetch
    #[serde(default, skip_serializing)]
    pub provider_id: String,

    /// Declared training-time budget in minutes
    #[serde(default)]
    pub availability_minutes: u64,

    /// Historical reliability in `[0, 1]`
    #[serde(default = "default_reliability")]
    pub reliability_score: f64,

    /// Profile lifecycle state
    #[serde(default)]
    pub status: ProfileStatus,
}

fn default_reliability() -> f64 {
    1.0
}

// ============================================================================
// Errors
// ============================================================================

/// Profile lookup and persistence failures
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("No profile found for provider '{0}'")]
    Missing(String),

    #[error("Provider '{id}' profile is {status}, not READY")]
    NotReady { id: String, status: ProfileStatus },

    #[error("Profile persistence failed: {context}")]
    Persistence {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ProfileError {
    fn persistence(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

// ============================================================================
// Profile Store Trait
// ============================================================================

/// Read access to provider profiles, plus the one write the
/// coordinator performs
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Look up a profile by provider id
    async fn fetch(&self, id: &str) -> Result<Option<ProviderProfile>, ProfileError>;

    /// Zero out a provider whose budget is spent
    async fn mark_exhausted(&self, id: &str) -> Result<(), ProfileError>;

    /// Fetch a profile and require it to be `READY`
    async fn fetch_ready(&self, id: &str) -> Result<ProviderProfile, ProfileError> {
        let profile = self
            .fetch(id)
            .await?
            .ok_or_else(|| ProfileError::Missing(id.to_string()))?;

        if profile.status != ProfileStatus::Ready {
            return Err(ProfileError::NotReady {
                id: id.to_string(),
                status: profile.status,
            });
        }

        Ok(profile)
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Profile store backed by a plain map, for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, ProviderProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile (keyed by its `provider_id`)
    pub async fn insert(&self, profile: ProviderProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.provider_id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn fetch(&self, id: &str) -> Result<Option<ProviderProfile>, ProfileError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(id).cloned())
    }

    async fn mark_exhausted(&self, id: &str) -> Result<(), ProfileError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| ProfileError::Missing(id.to_string()))?;

        profile.status = ProfileStatus::Exhausted;
        profile.availability_minutes = 0;
        Ok(())
    }
}

// ============================================================================
// File-Backed Store
// ============================================================================

/// Profile store backed by a JSON document on disk
///
/// The file maps provider id to profile document. It is read once at
/// startup and rewritten (atomically, temp file then rename) whenever
/// a provider is marked exhausted.
#[derive(Debug)]
pub struct FileProfileStore {
    path: PathBuf,
    profiles: RwLock<HashMap<String, ProviderProfile>>,
}

impl FileProfileStore {
    /// Load profiles from `path`; a missing file yields an empty store
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let profiles = if path.exists() {
            let file = std::fs::File::open(path).map_err(|e| {
                ProfileError::persistence(format!("Failed to open {}", path.display()), e)
            })?;

            let loaded: HashMap<String, ProviderProfile> =
                serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
                    ProfileError::persistence(format!("Failed to parse {}", path.display()), e)
                })?;

            info!(
                "Loaded {} provider profiles from {}",
                loaded.len(),
                path.display()
            );
            loaded
        } else {
            warn!(
                "Profile file {} does not exist; starting with no profiles",
                path.display()
            );
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            profiles: RwLock::new(profiles),
        })
    }

    fn persist(&self, profiles: &HashMap<String, ProviderProfile>) -> Result<(), ProfileError> {
        let temp_path = self.path.with_extension("json.tmp");

        let file = std::fs::File::create(&temp_path).map_err(|e| {
            ProfileError::persistence(format!("Failed to create {}", temp_path.display()), e)
        })?;

        serde_json::to_writer_pretty(std::io::BufWriter::new(file), profiles)
            .map_err(|e| ProfileError::persistence("Failed to serialize profiles", e))?;

        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            ProfileError::persistence(format!("Failed to rename to {}", self.path.display()), e)
        })?;

        debug!(path = %self.path.display(), "Profiles saved");
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn fetch(&self, id: &str) -> Result<Option<ProviderProfile>, ProfileError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(id).cloned().map(|mut profile| {
            profile.provider_id = id.to_string();
            profile
        }))
    }

    async fn mark_exhausted(&self, id: &str) -> Result<(), ProfileError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| ProfileError::Missing(id.to_string()))?;

        profile.status = ProfileStatus::Exhausted;
        profile.availability_minutes = 0;

        self.persist(&profiles)
    }
}

// ============================================================================
// Tests
// ============================================================================
