//! Provider-side client for the coordinator
//!
//! This module provides a client for provider nodes to communicate with
//! the coordinator: register, heartbeat, poll the current round, pull
//! the global model, and push a trained update. The `status` CLI
//! subcommand uses the same client for the operator surface.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::fleet::HardwareProfile;
use crate::round::RoundStatusResponse;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retry count for failed requests
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into(),
            timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Generic API response envelope from the operator surface
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Acknowledgement body returned by the provider protocol
#[derive(Debug, Deserialize)]
struct StatusAck {
    status: String,
}

#[derive(Debug, Deserialize)]
struct HealthPayload {
    status: String,
    version: String,
    uptime_secs: u64,
    providers: usize,
    round: u64,
}

/// Coordinator health as seen by a client
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub providers: usize,
    pub round: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody<'a> {
    provider_id: &'a str,
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the coordinator server
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Register with the coordinator, returning the acknowledged status
    ///
    /// The bearer token establishes the provider identity; the body is
    /// the reported hardware.
    pub async fn register(
        &self,
        token: &str,
        hardware: &HardwareProfile,
    ) -> Result<String, ClientError> {
        let url = format!("{}/provider/register", self.config.coordinator_url);
        let ack: StatusAck = self.post_with_retry(&url, Some(token), hardware).await?;
        Ok(ack.status)
    }

    /// Send a heartbeat for a registered provider
    pub async fn heartbeat(&self, provider_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/provider/heartbeat", self.config.coordinator_url);
        let _: StatusAck = self
            .post_with_retry(&url, None, &HeartbeatBody { provider_id })
            .await?;
        Ok(())
    }

    /// Poll the current round
    pub async fn current_round(&self) -> Result<RoundStatusResponse, ClientError> {
        let url = format!("{}/round/current", self.config.coordinator_url);
        self.get_with_retry(&url).await
    }

    /// Download the latest global model
    pub async fn download_model(&self) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}/model/latest", self.config.coordinator_url);
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tracing::warn!(attempt, url = %url, "Retrying model download");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.http_client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(bytes) => return Ok(bytes.to_vec()),
                            Err(e) => {
                                last_error = Some(ClientError::NetworkError(e.to_string()));
                            }
                        }
                    } else {
                        let error = ClientError::HttpError {
                            status: status.as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        };
                        // A 404 is a stable answer: no model exists yet
                        if status == reqwest::StatusCode::NOT_FOUND {
                            return Err(error);
                        }
                        last_error = Some(error);
                    }
                }
                Err(e) => {
                    last_error = Some(ClientError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("Unknown error".to_string())))
    }

    /// Upload a trained update for a round
    ///
    /// One attempt only: a failed upload is abandoned and the provider
    /// trains again when it sees the next round.
    pub async fn upload_update(
        &self,
        provider_id: &str,
        round: u64,
        payload: Vec<u8>,
    ) -> Result<(), ClientError> {
        let url = format!("{}/update", self.config.coordinator_url);

        let response = self
            .http_client
            .post(&url)
            .header("x-provider-id", provider_id)
            .header("x-round", round.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::HttpError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }

    /// Check coordinator health
    pub async fn health_check(&self) -> Result<HealthStatus, ClientError> {
        let url = format!("{}/api/health", self.config.coordinator_url);

        let response: ApiResponse<HealthPayload> = self.get_with_retry(&url).await?;

        if let Some(health) = response.data {
            Ok(HealthStatus {
                healthy: health.status == "healthy",
                version: health.version,
                uptime_secs: health.uptime_secs,
                providers: health.providers,
                round: health.round,
            })
        } else {
            Err(ClientError::InvalidResponse(
                "Missing health data".to_string(),
            ))
        }
    }

    /// Fetch coordinator statistics as free-form JSON
    pub async fn fetch_stats(&self) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/api/stats", self.config.coordinator_url);

        let response: ApiResponse<serde_json::Value> = self.get_with_retry(&url).await?;
        response
            .data
            .ok_or_else(|| ClientError::InvalidResponse("Missing stats data".to_string()))
    }

    // Internal: GET request with retry
    async fn get_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, ClientError> {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tracing::warn!(attempt, url = %url, "Retrying request");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.http_client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        match response.json::<T>().await {
                            Ok(data) => return Ok(data),
                            Err(e) => {
                                last_error = Some(ClientError::ParseError(e.to_string()));
                            }
                        }
                    } else {
                        last_error = Some(ClientError::HttpError {
                            status: response.status().as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(ClientError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("Unknown error".to_string())))
    }

    // Internal: POST request with retry, optionally bearer-authenticated
    async fn post_with_retry<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        token: Option<&str>,
        body: &T,
    ) -> Result<R, ClientError> {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tracing::warn!(attempt, url = %url, "Retrying request");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let mut request = self.http_client.post(url).json(body);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        match response.json::<R>().await {
                            Ok(data) => return Ok(data),
                            Err(e) => {
                                last_error = Some(ClientError::ParseError(e.to_string()));
                            }
                        }
                    } else {
                        last_error = Some(ClientError::HttpError {
                            status: response.status().as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(ClientError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("Unknown error".to_string())))
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// Invalid response
    InvalidResponse(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

// ============================================================================
// Tests
// ============================================================================
