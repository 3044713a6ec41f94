//! muster - Volunteer compute fleet coordinator
//!
//! Coordinates a fleet of volunteer compute providers through
//! synchronous federated training rounds: providers register and
//! heartbeat, a scheduler picks the best-scored participants for each
//! round, uploaded updates land in an artifact store, and an external
//! aggregation process folds them into the next global model.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`fleet`] - Provider registry, status lifecycle, offline sweeping
//! - [`scheduler`] - Deterministic participant selection
//! - [`round`] - Round lifecycle state and driver
//! - [`aggregation`] - External aggregation process control
//! - [`storage`] - Model and update artifacts on disk
//! - [`profile`] - Provider profile documents
//! - [`auth`] - Bearer token verification
//! - [`server`] - HTTP surface (provider protocol and operator API)
//! - [`client`] - Provider-side client
//!
//! # Example
//!
//! ```no_run
//! use muster::config::Config;
//! use muster::server::CoordinatorServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = CoordinatorServer::new(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod profile;
pub mod round;
pub mod scheduler;
pub mod server;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, MusterErrorTrait, Result};
    pub use crate::fleet::{HardwareProfile, ProviderInfo, ProviderRegistry, ProviderStatus};
    pub use crate::round::{RoundManager, RoundPhase, RoundStatus};
    pub use crate::scheduler::{select_for_round, SelectionParams};
    pub use crate::server::CoordinatorServer;
    pub use crate::storage::ArtifactStore;
}

// Direct re-exports for convenience
pub use error::{Error, Result};
