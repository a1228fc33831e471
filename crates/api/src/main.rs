use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use persistence::PgTargetStore;
use snippet_migrator_api::{
    app,
    config::Config,
    jobs::{JobScheduler, RegistryEvictionJob},
    middleware,
    services::{DefaultConnectorFactory, JobRegistry, MigrationService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    info!("Starting snippet migrator v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&(&config.database).into()).await?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    let registry = Arc::new(JobRegistry::new());
    let service = Arc::new(MigrationService::new(
        Arc::clone(&registry),
        Arc::new(PgTargetStore::new(pool.clone())),
        Arc::new(DefaultConnectorFactory::new(config.migration.clone())),
        config.migration.engine_settings(),
    ));

    let mut scheduler = JobScheduler::new();
    scheduler.register(RegistryEvictionJob::new(
        registry,
        Duration::from_secs(config.jobs.retention_secs),
        config.jobs.eviction_interval_secs,
    ));
    scheduler.start();

    let addr = config.socket_addr()?;
    let app = app::create_app(config, service);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
