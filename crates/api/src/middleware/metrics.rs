//! Prometheus metrics: HTTP middleware, engine counters and the exporter.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use domain::models::{EntityKind, JobStatus};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = method_to_str(req.method());
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        "http_requests_total",
        "method" => method,
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(duration);

    response
}

/// Convert HTTP method to string for metric labels.
fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

/// Outcome label for `migration_items_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Imported,
    Skipped,
    Failed,
}

impl ItemOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Imported => "imported",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Failed => "failed",
        }
    }
}

pub fn record_item(kind: EntityKind, outcome: ItemOutcome) {
    counter!(
        "migration_items_total",
        "kind" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_job_finished(status: JobStatus) {
    counter!("migration_jobs_total", "status" => status.as_str()).increment(1);
}

pub fn record_rate_limit_wait(seconds: f64) {
    histogram!("migration_rate_limit_wait_seconds").record(seconds);
}

/// Handler for /metrics endpoint that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
    } else {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        )
    }
}

/// Installs the global Prometheus recorder.
///
/// Must be called once during startup, before any metric is recorded. A
/// second call is a no-op.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&[
            0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 30.0, 120.0,
        ])?
        .install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}
