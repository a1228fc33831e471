//! Migration summary entity.
//!
//! One row per finished run, written after the job reaches a terminal state.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::MigrationSummary;

/// Database row mapping for the migration_summaries table.
#[derive(Debug, Clone, FromRow)]
pub struct MigrationSummaryEntity {
    pub job_id: Uuid,
    /// `legacy_migration` or `remote_import`
    pub kind: String,
    pub status: String,
    pub source_url: String,
    pub items_total: i64,
    pub items_imported: i64,
    pub error_count: i64,
    /// Settings snapshot; never contains the auth token.
    pub settings: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MigrationSummaryEntity> for MigrationSummary {
    type Error = String;

    fn try_from(entity: MigrationSummaryEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            job_id: entity.job_id,
            kind: entity.kind.parse()?,
            status: entity.status.parse()?,
            source_url: entity.source_url,
            items_total: entity.items_total,
            items_imported: entity.items_imported,
            error_count: entity.error_count,
            settings: entity.settings,
            started_at: entity.started_at,
            completed_at: entity.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{JobKind, JobStatus};

    fn entity(kind: &str, status: &str) -> MigrationSummaryEntity {
        MigrationSummaryEntity {
            job_id: Uuid::new_v4(),
            kind: kind.to_string(),
            status: status.to_string(),
            source_url: "https://api.github.com".to_string(),
            items_total: 10,
            items_imported: 7,
            error_count: 1,
            settings: serde_json::json!({"batch_size": 100}),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_entity_to_summary() {
        let summary = MigrationSummary::try_from(entity("remote_import", "cancelled")).unwrap();
        assert_eq!(summary.kind, JobKind::RemoteImport);
        assert_eq!(summary.status, JobStatus::Cancelled);
        assert_eq!(summary.items_imported, 7);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(MigrationSummary::try_from(entity("remote_import", "paused")).is_err());
        assert!(MigrationSummary::try_from(entity("sync", "completed")).is_err());
    }
}
