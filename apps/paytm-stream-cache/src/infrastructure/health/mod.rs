//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream and cache status reporting, and
//! Prometheus metrics. Used by container orchestrators and monitoring.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the stream and the snapshot cache
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready while streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{CacheMode, SnapshotRepository, WriterStats, WriterStatus};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::paytm::connection::{ConnectionManager, ConnectionState, ConnectionStats};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Broadcast connection status.
    pub stream: StreamStatus,
    /// Snapshot cache status.
    pub cache: CacheStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming and caching.
    Healthy,
    /// Running, but not streaming or not caching.
    Degraded,
    /// The stream is closed for good.
    Unhealthy,
}

/// Broadcast connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Subscribed instruments.
    pub subscriptions: String,
    /// Connection counters.
    #[serde(flatten)]
    pub stats: ConnectionStats,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

/// Snapshot cache status.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Backend name.
    pub backend: &'static str,
    /// Whether the backend answered a ping.
    pub reachable: bool,
    /// Writer counters and mode.
    #[serde(flatten)]
    pub writer: WriterStats,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connection: Arc<ConnectionManager>,
    writer: Arc<WriterStatus>,
    repository: Arc<SnapshotRepository>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        connection: Arc<ConnectionManager>,
        writer: Arc<WriterStatus>,
        repository: Arc<SnapshotRepository>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connection,
            writer,
            repository,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.connection.state() == ConnectionState::Streaming {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let reachable = match state.repository.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Health check ping failed");
            false
        }
    };

    let stream = StreamStatus {
        state: state.connection.state(),
        subscriptions: state.connection.subscriptions().to_string(),
        stats: state.connection.stats(),
        last_error: state.connection.last_error(),
    };
    let cache = CacheStatus {
        backend: state.repository.backend_name(),
        reachable,
        writer: state.writer.stats(),
    };

    HealthResponse {
        status: determine_health_status(stream.state, cache.writer.mode, reachable),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream,
        cache,
    }
}

fn determine_health_status(
    connection: ConnectionState,
    mode: CacheMode,
    reachable: bool,
) -> HealthStatus {
    match connection {
        ConnectionState::Closed => HealthStatus::Unhealthy,
        ConnectionState::Streaming if mode == CacheMode::Active && reachable => {
            HealthStatus::Healthy
        }
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
