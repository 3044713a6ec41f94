//! Coordinator HTTP server
//!
//! Wires the fleet registry, profile store, identity verifier, artifact
//! store and round driver together behind one axum router, and owns the
//! background tasks (round driver, offline sweeper) for the lifetime of
//! the server.

pub mod api;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::aggregation::ProcessAggregator;
use crate::auth::{IdentityVerifier, StaticTokenVerifier};
use crate::config::Config;
use crate::fleet::{start_offline_sweeper, ProviderRegistry, SweepConfig};
use crate::profile::{FileProfileStore, MemoryProfileStore, ProfileStore};
use crate::round::{RoundManager, RoundManagerHandle, RoundStatus};
use crate::storage::ArtifactStore;

pub use api::{ApiResponse, ErrorResponse, HealthResponse, ProviderSummary};

// ============================================================================
// Server State
// ============================================================================

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Live fleet membership
    pub registry: Arc<ProviderRegistry>,

    /// Provider profile documents
    pub profiles: Arc<dyn ProfileStore>,

    /// Bearer token verification
    pub verifier: Arc<dyn IdentityVerifier>,

    /// Model and update artifacts
    pub store: ArtifactStore,

    /// Current round, shared with the driver
    pub round_status: Arc<RwLock<RoundStatus>>,

    /// Server start time for uptime reporting
    pub start_time: Instant,

    /// Full configuration
    pub config: Config,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// The coordinator HTTP server
pub struct CoordinatorServer {
    config: Config,
    state: AppState,
    manager: RoundManager,
}

impl CoordinatorServer {
    /// Create a new server, building every component from configuration
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let store = ArtifactStore::from_config(&config.storage)
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        let profiles: Arc<dyn ProfileStore> = match &config.profiles.path {
            Some(path) => Arc::new(
                FileProfileStore::load(path)
                    .map_err(|e| ServerError::InitError(e.to_string()))?,
            ),
            None => {
                warn!("No profile document configured, using an empty in-memory store");
                Arc::new(MemoryProfileStore::new())
            }
        };

        let verifier = StaticTokenVerifier::from_config(&config.auth);
        if verifier.is_empty() {
            warn!("Auth token table is empty, every registration will be rejected");
        }

        let registry = Arc::new(ProviderRegistry::new(config.fleet.max_providers));
        let aggregator = Arc::new(ProcessAggregator::from_config(&config.aggregation));

        let manager = RoundManager::new(
            registry.clone(),
            profiles.clone(),
            store.clone(),
            aggregator,
            &config,
        );

        let state = AppState {
            registry,
            profiles,
            verifier: Arc::new(verifier),
            store,
            round_status: manager.status_handle(),
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self {
            config,
            state,
            manager,
        })
    }

    /// Get a clone of the shared state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes and configured middleware
    pub fn build_router(&self) -> Router {
        let mut router = api::create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server until Ctrl-C
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    /// Run the server until the given future resolves
    pub async fn start_with_shutdown(
        &self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        self.state
            .store
            .bootstrap_if_empty(self.config.aggregation.bootstrap.as_ref())
            .await
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        let tasks = self.start_background_tasks();
        let router = self.build_router();
        let addr = self.config.bind_addr();

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind {addr}: {e}")))?;

        info!("Coordinator listening on {}", addr);
        self.log_startup_info();

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        tasks.shutdown().await;
        info!("Coordinator stopped");

        result
    }

    /// Spawn the round driver and the offline sweeper
    fn start_background_tasks(&self) -> BackgroundTasks {
        let (sweeper_shutdown, sweeper_rx) = watch::channel(false);
        let sweeper = start_offline_sweeper(
            self.state.registry.clone(),
            self.state.round_status.clone(),
            SweepConfig::from(&self.config.fleet),
            sweeper_rx,
        );

        BackgroundTasks {
            manager: self.manager.start(),
            sweeper,
            sweeper_shutdown,
        }
    }

    fn log_startup_info(&self) {
        info!(
            max_providers = self.config.fleet.max_providers,
            staleness_secs = self.config.fleet.staleness_secs,
            round_timeout_secs = self.config.round.timeout_secs,
            round_duration_minutes = self.config.round.duration_minutes,
            max_per_round = self.config.round.max_per_round,
            storage_root = %self.config.storage.root.display(),
            "Coordinator configuration"
        );
    }
}

/// Wait for Ctrl-C
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => warn!(%err, "Failed to listen for shutdown signal"),
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

/// Handles for the background tasks the server owns
struct BackgroundTasks {
    manager: RoundManagerHandle,
    sweeper: tokio::task::JoinHandle<()>,
    sweeper_shutdown: watch::Sender<bool>,
}

impl BackgroundTasks {
    /// Stop the driver and sweeper and wait for both to exit
    async fn shutdown(self) {
        self.manager.shutdown().await;
        let _ = self.sweeper_shutdown.send(true);
        let _ = self.sweeper.await;
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// Configuration validation failed
    ConfigError(String),

    /// A component failed to initialize
    InitError(String),

    /// Could not bind the listen address
    BindError(String),

    /// Serving failed
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::BindError(msg) => write!(f, "Bind error: {msg}"),
            Self::ServeError(msg) => write!(f, "Serve error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================
