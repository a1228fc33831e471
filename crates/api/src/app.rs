use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{health, migrations};
use crate::services::MigrationService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<MigrationService>,
}

pub fn create_app(config: Config, service: Arc<MigrationService>) -> Router {
    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        service,
    };

    let migration_routes = Router::new()
        .route(
            "/api/v1/migrations",
            post(migrations::start_migration).get(migrations::list_jobs),
        )
        .route("/api/v1/migrations/dry-run", post(migrations::dry_run))
        .route("/api/v1/migrations/history", get(migrations::history))
        .route(
            "/api/v1/migrations/:job_id",
            get(migrations::get_job).delete(migrations::cancel_job),
        );

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(migration_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .with_state(state)
}
