//! HTTP API routes and handlers
//!
//! Two surfaces share one router. The provider protocol
//! (`/provider/*`, `/round/current`, `/model/latest`, `/update`) keeps
//! the exact wire shapes the provider nodes speak; the operator surface
//! (`/api/*`, `/metrics`) wraps responses in the standard
//! [`ApiResponse`] envelope.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::parse_bearer;
use crate::error::ErrorCategory;
use crate::fleet::{HardwareProfile, ProviderInfo, ProviderStatus};
use crate::metrics;
use crate::profile::ProfileError;
use crate::round::RoundStatusResponse;
use crate::server::AppState;
use crate::storage::StorageError;

/// Model updates are raw tensor blobs; the default body limit is far
/// too small for them
const MAX_UPDATE_BYTES: usize = 100 * 1024 * 1024;

// ============================================================================
// Response Types
// ============================================================================

/// Standard envelope for operator API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,

    /// Response data (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Failure body for the provider protocol
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,

    /// Machine-readable category code
    pub code: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            error: message.into(),
            code: category.as_str().to_string(),
        }
    }
}

/// Acknowledgement body for provider protocol successes
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusAck {
    pub status: String,
}

impl StatusAck {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Heartbeat request body
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub provider_id: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub providers: usize,
    pub round: u64,
}

/// One fleet entry, as exposed to operators
#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: String,
    pub gpu: String,
    pub status: ProviderStatus,
    pub availability_minutes: u64,
    pub reliability_score: f64,
    pub seconds_since_seen: i64,
    pub rounds_participated: u64,
}

impl From<&ProviderInfo> for ProviderSummary {
    fn from(info: &ProviderInfo) -> Self {
        Self {
            id: info.id.clone(),
            gpu: info.capabilities.gpu_model.clone(),
            status: info.status,
            availability_minutes: info.availability_minutes,
            reliability_score: info.reliability_score,
            seconds_since_seen: info.seconds_since_seen(),
            rounds_participated: info.rounds_participated,
        }
    }
}

/// Build a provider-protocol failure response
fn protocol_error(
    status: StatusCode,
    message: impl Into<String>,
    category: ErrorCategory,
) -> Response {
    (status, Json(ErrorResponse::new(message, category))).into_response()
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Provider protocol
        .route("/provider/register", post(register_provider))
        .route("/provider/heartbeat", post(heartbeat))
        .route("/round/current", get(current_round))
        .route("/model/latest", get(latest_model))
        .route(
            "/update",
            post(store_update).layer(DefaultBodyLimit::max(MAX_UPDATE_BYTES)),
        )
        // Operator surface
        .route("/api/health", get(get_health))
        .route("/api/providers", get(get_providers))
        .route("/api/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Per-request counter and duration metrics, labeled by matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let Some(endpoint) = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
    else {
        return next.run(request).await;
    };

    let timer = metrics::start_api_timer(&endpoint);
    let response = next.run(request).await;
    drop(timer);

    metrics::record_api_request(&endpoint, response.status().as_u16());
    response
}

// ============================================================================
// Provider Protocol Handlers
// ============================================================================

/// POST /provider/register
///
/// Bearer-authenticated. The token establishes the provider id; the
/// profile store decides whether that provider may join the fleet.
async fn register_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(hardware): Json<HardwareProfile>,
) -> Response {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = match parse_bearer(auth_header) {
        Ok(token) => token,
        Err(err) => {
            debug!(%err, "Registration without usable bearer token");
            return protocol_error(
                StatusCode::UNAUTHORIZED,
                err.to_string(),
                ErrorCategory::Auth,
            );
        }
    };

    let identity = match state.verifier.verify(token).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(%err, "Token verification failed");
            return protocol_error(
                StatusCode::UNAUTHORIZED,
                err.to_string(),
                ErrorCategory::Auth,
            );
        }
    };

    let profile = match state.profiles.fetch_ready(&identity.subject).await {
        Ok(profile) => profile,
        Err(err) => {
            let status = match &err {
                ProfileError::Missing(_) => StatusCode::BAD_REQUEST,
                ProfileError::NotReady { .. } => StatusCode::FORBIDDEN,
                ProfileError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(provider_id = %identity.subject, %err, "Registration rejected by profile check");
            return protocol_error(status, err.to_string(), ErrorCategory::Profile);
        }
    };

    if let Err(err) = state
        .registry
        .register(
            &identity.subject,
            hardware,
            profile.availability_minutes,
            profile.reliability_score,
        )
        .await
    {
        warn!(provider_id = %identity.subject, %err, "Registration rejected by registry");
        return protocol_error(
            StatusCode::SERVICE_UNAVAILABLE,
            err.to_string(),
            ErrorCategory::Fleet,
        );
    }

    metrics::record_registration();
    metrics::set_live_providers(state.registry.len().await as i64);
    info!(
        provider_id = %identity.subject,
        availability_minutes = profile.availability_minutes,
        "Provider registered"
    );

    Json(StatusAck::new("ONLINE")).into_response()
}

/// POST /provider/heartbeat
///
/// An unknown id gets a 404 rather than an implicit re-registration,
/// so an evicted provider learns it must register again.
async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Response {
    match state.registry.heartbeat(&request.provider_id).await {
        Ok(()) => {
            metrics::record_heartbeat();
            Json(StatusAck::new("alive")).into_response()
        }
        Err(err) => {
            debug!(provider_id = %request.provider_id, "Heartbeat from unknown provider");
            protocol_error(StatusCode::NOT_FOUND, err.to_string(), ErrorCategory::Fleet)
        }
    }
}

/// GET /round/current
async fn current_round(State(state): State<AppState>) -> Json<RoundStatusResponse> {
    let status = state.round_status.read().await;
    Json(status.response())
}

/// GET /model/latest
///
/// Serves the newest global model as a raw byte body.
async fn latest_model(State(state): State<AppState>) -> Response {
    let latest = match state.store.latest_global().await {
        Ok(latest) => latest,
        Err(err) => {
            warn!(%err, "Global model scan failed");
            return protocol_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                ErrorCategory::Storage,
            );
        }
    };

    let Some((ordinal, path)) = latest else {
        return protocol_error(
            StatusCode::NOT_FOUND,
            "No model found",
            ErrorCategory::Storage,
        );
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!(round = ordinal, bytes = bytes.len(), "Serving global model");
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                bytes,
            )
                .into_response()
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "Global model read failed");
            protocol_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Model read failed",
                ErrorCategory::Storage,
            )
        }
    }
}

/// POST /update
///
/// Round and provider identity travel in headers so the body stays a
/// raw artifact blob, exactly as the provider nodes send it. Any round
/// number is accepted; stale uploads land on disk and age out with
/// their round's purge.
async fn store_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider_id) = header_str(&headers, "x-provider-id") else {
        return protocol_error(
            StatusCode::BAD_REQUEST,
            "Missing x-provider-id header",
            ErrorCategory::Storage,
        );
    };

    let Some(round) = header_str(&headers, "x-round").and_then(|v| v.parse::<u64>().ok()) else {
        return protocol_error(
            StatusCode::BAD_REQUEST,
            "Missing or invalid x-round header",
            ErrorCategory::Storage,
        );
    };

    match state.store.store_update(round, provider_id, &body).await {
        Ok(_) => {
            metrics::record_update_stored(body.len());
            info!(provider_id = %provider_id, round, bytes = body.len(), "Update received");
            Json(StatusAck::new("stored")).into_response()
        }
        Err(err @ StorageError::InvalidProviderId(_)) => {
            protocol_error(StatusCode::BAD_REQUEST, err.to_string(), ErrorCategory::Storage)
        }
        Err(err) => {
            warn!(provider_id = %provider_id, round, %err, "Update store failed");
            protocol_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                ErrorCategory::Storage,
            )
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

// ============================================================================
// Operator Handlers
// ============================================================================

/// GET /api/health
async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let round = state.round_status.read().await.ordinal;

    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        providers: state.registry.len().await,
        round,
    };

    Json(ApiResponse::success(health))
}

/// GET /api/providers
async fn get_providers(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot().await;
    let mut providers: Vec<ProviderSummary> =
        snapshot.iter().map(ProviderSummary::from).collect();
    providers.sort_by(|a, b| a.id.cmp(&b.id));

    Json(ApiResponse::success(providers))
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> Response {
    #[derive(Serialize)]
    struct StatsResponse {
        registry: crate::fleet::RegistryStats,
        round: crate::round::RoundStatus,
        artifacts: crate::storage::ArtifactCounts,
        uptime_secs: u64,
    }

    let artifacts = match state.store.counts().await {
        Ok(counts) => counts,
        Err(err) => {
            warn!(%err, "Artifact count scan failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(err.to_string())),
            )
                .into_response();
        }
    };

    let stats = StatsResponse {
        registry: state.registry.stats().await,
        round: state.round_status.read().await.clone(),
        artifacts,
        uptime_secs: state.start_time.elapsed().as_secs(),
    };

    Json(ApiResponse::success(stats)).into_response()
}

/// GET /metrics
async fn get_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(%err, "Metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
