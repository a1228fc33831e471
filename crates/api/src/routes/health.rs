//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseHealth,
    pub jobs: JobsHealth,
}

/// Target store health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseHealth {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct JobsHealth {
    /// Descriptors currently held in memory, finished ones included.
    pub tracked: usize,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check endpoint.
///
/// Returns 503 with the same body shape when the target store is down.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let db_connected = state.service.store().ping().await.is_ok();
    let latency_ms = start.elapsed().as_millis() as u64;

    let response = HealthResponse {
        status: if db_connected { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: DatabaseHealth {
            connected: db_connected,
            latency_ms: db_connected.then_some(latency_ms),
        },
        jobs: JobsHealth {
            tracked: state.service.registry().len().await,
        },
    };

    let status = if db_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the service can accept traffic (target store reachable).
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    match state.service.store().ping().await {
        Ok(()) => Ok(Json(StatusResponse {
            status: "ready".to_string(),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
