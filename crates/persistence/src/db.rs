//! Database connection pool management.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Small pool for a job-scoped connection to a source database.
    pub fn scoped(url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            url: url.into(),
            max_connections: max_connections.max(1),
            min_connections: 0,
            connect_timeout_secs: 10,
            idle_timeout_secs: 60,
        }
    }
}

/// Creates a PostgreSQL connection pool with the given configuration.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
}

/// Applies the target schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./src/migrations").run(pool).await
}
