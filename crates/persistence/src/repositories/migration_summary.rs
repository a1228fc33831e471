//! Repository for migration summaries.
//!
//! Summaries are written once a job reaches a terminal state and read back
//! by the history endpoint.

use sqlx::PgPool;

use domain::models::MigrationSummary;

use crate::entities::MigrationSummaryEntity;
use crate::metrics::QueryTimer;

/// Repository for migration summary operations.
#[derive(Debug, Clone)]
pub struct MigrationSummaryRepository {
    pool: PgPool,
}

impl MigrationSummaryRepository {
    /// Creates a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces the summary for a job.
    pub async fn upsert(
        &self,
        summary: &MigrationSummary,
    ) -> Result<MigrationSummaryEntity, sqlx::Error> {
        let timer = QueryTimer::new("upsert_migration_summary");
        let result = sqlx::query_as::<_, MigrationSummaryEntity>(
            r#"
            INSERT INTO migration_summaries (
                job_id,
                kind,
                status,
                source_url,
                items_total,
                items_imported,
                error_count,
                settings,
                started_at,
                completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (job_id) DO UPDATE SET
                status = EXCLUDED.status,
                items_total = EXCLUDED.items_total,
                items_imported = EXCLUDED.items_imported,
                error_count = EXCLUDED.error_count,
                completed_at = EXCLUDED.completed_at
            RETURNING
                job_id,
                kind,
                status,
                source_url,
                items_total,
                items_imported,
                error_count,
                settings,
                started_at,
                completed_at
            "#,
        )
        .bind(summary.job_id)
        .bind(summary.kind.as_str())
        .bind(summary.status.as_str())
        .bind(&summary.source_url)
        .bind(summary.items_total)
        .bind(summary.items_imported)
        .bind(summary.error_count)
        .bind(&summary.settings)
        .bind(summary.started_at)
        .bind(summary.completed_at)
        .fetch_one(&self.pool)
        .await;
        timer.finish(result)
    }

    /// Lists summaries newest first. `page` is 1-based.
    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
    ) -> Result<Vec<MigrationSummaryEntity>, sqlx::Error> {
        let offset = (page.max(1) - 1) * per_page;
        let timer = QueryTimer::new("list_migration_summaries");
        let result = sqlx::query_as::<_, MigrationSummaryEntity>(
            r#"
            SELECT
                job_id,
                kind,
                status,
                source_url,
                items_total,
                items_imported,
                error_count,
                settings,
                started_at,
                completed_at
            FROM migration_summaries
            ORDER BY started_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.finish(result)
    }
}
