//! Migration job control endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use domain::models::{DryRunSummary, JobStatus, MigrationJob, MigrationSettings, MigrationSummary};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::services::CancelOutcome;

/// Response for a started job.
#[derive(Debug, Serialize)]
pub struct StartMigrationResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<MigrationJob>,
}

/// Query parameters for the summary history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Page number (1-based)
    #[serde(default = "default_page")]
    pub page: u32,

    /// Items per page (1-100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<MigrationSummary>,
    pub page: u32,
    pub per_page: u32,
}

/// Decodes request settings, filling `batch_size` from configuration when
/// the request leaves it out.
fn parse_settings(mut raw: Value, default_batch_size: u32) -> Result<MigrationSettings, ApiError> {
    if let Value::Object(fields) = &mut raw {
        fields
            .entry("batch_size")
            .or_insert_with(|| Value::from(default_batch_size));
    }
    let settings: MigrationSettings =
        serde_json::from_value(raw).map_err(|e| ApiError::Validation(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

/// POST /api/v1/migrations
///
/// Starts a job in the background and returns 202 with its ID.
pub async fn start_migration(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(raw): Json<Value>,
) -> Result<(StatusCode, Json<StartMigrationResponse>), ApiError> {
    let settings = parse_settings(raw, state.config.migration.default_batch_size)?;
    let job = state.service.start(settings).await?;

    info!(
        job_id = %job.id,
        kind = %job.kind,
        request_id = %request_id.0,
        "Migration requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartMigrationResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// POST /api/v1/migrations/dry-run
///
/// Projects what a run would do without writing anything.
pub async fn dry_run(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<DryRunSummary>, ApiError> {
    let settings = parse_settings(raw, state.config.migration.default_batch_size)?;
    let summary = state.service.dry_run(settings).await?;
    Ok(Json(summary))
}

/// GET /api/v1/migrations
pub async fn list_jobs(State(state): State<AppState>) -> Json<ListJobsResponse> {
    Json(ListJobsResponse {
        jobs: state.service.list().await,
    })
}

/// GET /api/v1/migrations/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<MigrationJob>, ApiError> {
    Ok(Json(state.service.status(job_id).await?))
}

/// DELETE /api/v1/migrations/:job_id
///
/// Cancels a running job. A job that already finished is a conflict.
pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<MigrationJob>, ApiError> {
    match state.service.cancel(job_id).await? {
        CancelOutcome::Cancelled(job) => {
            info!(job_id = %job.id, request_id = %request_id.0, "Cancellation requested");
            Ok(Json(job))
        }
        CancelOutcome::AlreadyFinished(job) => Err(ApiError::Conflict(format!(
            "Job {} is already {}",
            job.id, job.status
        ))),
    }
}

/// GET /api/v1/migrations/history
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 100);
    let data = state.service.history(page, per_page).await?;
    Ok(Json(HistoryResponse {
        data,
        page,
        per_page,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::SourceKind;
    use serde_json::json;

    #[test]
    fn test_parse_settings_fills_batch_size() {
        let settings = parse_settings(
            json!({ "source_kind": "legacy", "source_url": "postgres://db/legacy" }),
            250,
        )
        .unwrap();
        assert_eq!(settings.source_kind, SourceKind::Legacy);
        assert_eq!(settings.batch_size, 250);
    }

    #[test]
    fn test_parse_settings_keeps_explicit_batch_size() {
        let settings = parse_settings(
            json!({
                "source_kind": "legacy",
                "source_url": "postgres://db/legacy",
                "batch_size": 10
            }),
            250,
        )
        .unwrap();
        assert_eq!(settings.batch_size, 10);
    }

    #[test]
    fn test_parse_settings_rejects_bad_input() {
        let unknown_kind = parse_settings(json!({ "source_kind": "svn", "source_url": "x" }), 100);
        assert!(matches!(unknown_kind, Err(ApiError::Validation(_))));

        let missing_token = parse_settings(
            json!({
                "source_kind": "github",
                "source_url": "https://api.github.com",
                "username": "alice"
            }),
            100,
        );
        assert!(matches!(missing_token, Err(ApiError::Validation(_))));
    }
}
