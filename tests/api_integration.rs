//! End-to-end HTTP tests against the coordinator router
//!
//! Each test drives the real router with `tower::ServiceExt::oneshot`
//! and asserts the exact wire shapes providers depend on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceExt;

use muster::auth::StaticTokenVerifier;
use muster::config::Config;
use muster::fleet::{ProviderRegistry, ProviderStatus};
use muster::profile::{MemoryProfileStore, ProfileStatus, ProviderProfile};
use muster::round::{RoundPhase, RoundStatus};
use muster::server::api::create_router;
use muster::server::AppState;
use muster::storage::ArtifactStore;

struct Harness {
    _dir: TempDir,
    state: AppState,
    router: Router,
}

/// Token table: token-1 -> prov-1 (READY profile), token-2 -> prov-2
/// (REGISTERED profile), token-3 -> prov-3 (no profile at all).
async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();

    let profiles = Arc::new(MemoryProfileStore::new());
    profiles
        .insert(ProviderProfile {
            provider_id: "prov-1".to_string(),
            availability_minutes: 120,
            reliability_score: 0.9,
            status: ProfileStatus::Ready,
        })
        .await;
    profiles
        .insert(ProviderProfile {
            provider_id: "prov-2".to_string(),
            availability_minutes: 60,
            reliability_score: 1.0,
            status: ProfileStatus::Registered,
        })
        .await;

    let mut tokens = BTreeMap::new();
    tokens.insert("token-1".to_string(), "prov-1".to_string());
    tokens.insert("token-2".to_string(), "prov-2".to_string());
    tokens.insert("token-3".to_string(), "prov-3".to_string());

    let state = AppState {
        registry: Arc::new(ProviderRegistry::new(16)),
        profiles,
        verifier: Arc::new(StaticTokenVerifier::new(tokens)),
        store: ArtifactStore::new(dir.path()).unwrap(),
        round_status: Arc::new(RwLock::new(RoundStatus::default())),
        start_time: Instant::now(),
        config: Config::default(),
    };

    Harness {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

fn register_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/provider/register")
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let body = serde_json::json!({
        "gpu": "RTX 4090",
        "vram": 24,
        "cpuCores": 16,
        "ramGB": 64
    });

    builder.body(Body::from(body.to_string())).unwrap()
}

fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn register_accepts_ready_provider() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(register_request(Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"status": "ONLINE"})
    );

    let info = h.state.registry.get("prov-1").await.unwrap();
    assert_eq!(info.status, ProviderStatus::Idle);
    assert_eq!(info.availability_minutes, 120);
    assert_eq!(info.capabilities.gpu_model, "RTX 4090");
}

#[tokio::test]
async fn register_without_token_is_unauthorized() {
    let h = harness().await;

    let response = h.router.clone().oneshot(register_request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "auth");
    assert!(h.state.registry.is_empty().await);
}

#[tokio::test]
async fn register_with_unknown_token_is_unauthorized() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(register_request(Some("bogus")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "auth");
}

#[tokio::test]
async fn register_without_profile_is_bad_request() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(register_request(Some("token-3")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "profile");
}

#[tokio::test]
async fn register_with_unready_profile_is_forbidden() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(register_request(Some("token-2")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "profile");
    assert!(body["error"].as_str().unwrap().contains("REGISTERED"));
}

// ============================================================================
// Heartbeats
// ============================================================================

#[tokio::test]
async fn heartbeat_round_trip() {
    let h = harness().await;

    h.router
        .clone()
        .oneshot(register_request(Some("token-1")))
        .await
        .unwrap();

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "/provider/heartbeat",
            serde_json::json!({"providerId": "prov-1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"status": "alive"})
    );
}

#[tokio::test]
async fn heartbeat_for_ghost_is_not_found() {
    let h = harness().await;

    h.router
        .clone()
        .oneshot(register_request(Some("token-1")))
        .await
        .unwrap();

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "/provider/heartbeat",
            serde_json::json!({"providerId": "ghost"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "fleet");

    // the unknown id was not implicitly registered
    assert_eq!(h.state.registry.len().await, 1);
    assert!(h.state.registry.get("ghost").await.is_none());
}

// ============================================================================
// Round Status
// ============================================================================

#[tokio::test]
async fn current_round_reflects_shared_status() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(get_request("/round/current"))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"round": 0, "active": false})
    );

    {
        let mut status = h.state.round_status.write().await;
        status.ordinal = 5;
        status.advance(RoundPhase::Active).unwrap();
    }

    let response = h
        .router
        .clone()
        .oneshot(get_request("/round/current"))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"round": 5, "active": true})
    );
}

// ============================================================================
// Model Download
// ============================================================================

#[tokio::test]
async fn model_latest_serves_highest_round() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(get_request("/model/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "No model found");
    assert_eq!(body["code"], "storage");

    std::fs::write(h.state.store.global_path(2), b"old weights").unwrap();
    std::fs::write(h.state.store.global_path(10), b"new weights").unwrap();

    let response = h
        .router
        .clone()
        .oneshot(get_request("/model/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/octet-stream")
    );

    // round-10 beats round-2 numerically, not lexicographically
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"new weights");
}

// ============================================================================
// Update Upload
// ============================================================================

fn update_request(provider_id: Option<&str>, round: Option<&str>, body: &[u8]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/update")
        .header(header::CONTENT_TYPE, "application/octet-stream");

    if let Some(id) = provider_id {
        builder = builder.header("x-provider-id", id);
    }
    if let Some(round) = round {
        builder = builder.header("x-round", round);
    }

    builder.body(Body::from(body.to_vec())).unwrap()
}

#[tokio::test]
async fn update_is_stored_on_disk() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(update_request(Some("prov-1"), Some("7"), b"delta"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"status": "stored"})
    );

    let stored = h.state.store.updates_dir().join("round-7-prov-1.pt");
    assert_eq!(std::fs::read(stored).unwrap(), b"delta");
}

#[tokio::test]
async fn update_with_missing_headers_is_rejected() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(update_request(None, Some("7"), b"delta"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .router
        .clone()
        .oneshot(update_request(Some("prov-1"), None, b"delta"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .router
        .clone()
        .oneshot(update_request(Some("prov-1"), Some("not-a-round"), b"delta"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_with_unsafe_provider_id_is_rejected() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(update_request(Some("../escape"), Some("7"), b"delta"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "storage");
}

// ============================================================================
// Operator Surface
// ============================================================================

#[tokio::test]
async fn health_reports_fleet_and_round() {
    let h = harness().await;

    h.router
        .clone()
        .oneshot(register_request(Some("token-1")))
        .await
        .unwrap();

    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["providers"], 1);
    assert_eq!(body["data"]["round"], 0);
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn providers_and_stats_expose_registry() {
    let h = harness().await;

    h.router
        .clone()
        .oneshot(register_request(Some("token-1")))
        .await
        .unwrap();

    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/providers"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["id"], "prov-1");
    assert_eq!(body["data"][0]["status"], "IDLE");
    assert_eq!(body["data"][0]["availability_minutes"], 120);

    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/stats"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["registry"]["total_providers"], 1);
    assert_eq!(body["data"]["registry"]["idle"], 1);
    assert_eq!(body["data"]["artifacts"]["global_models"], 0);
}

#[tokio::test]
async fn metrics_exposition_is_text() {
    let h = harness().await;
    let _ = muster::metrics::init_metrics();

    let response = h
        .router
        .clone()
        .oneshot(get_request("/metrics"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("muster_fleet_registrations_total"));
}
