use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use domain::services::StoreError;
use domain::MigrationError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The source system could not be reached or rejected us.
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "source_unavailable", msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::JobNotFound(id) => ApiError::NotFound(format!("Job not found: {}", id)),
            MigrationError::InvalidSettings(msg) => ApiError::Validation(msg),
            MigrationError::Connection(_) | MigrationError::SchemaValidation(_) => {
                ApiError::BadGateway(err.to_string())
            }
            MigrationError::Cancelled => ApiError::Conflict(err.to_string()),
            MigrationError::RateLimited { .. } => ApiError::ServiceUnavailable(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Backend(msg) => ApiError::Internal(format!("Storage error: {}", msg)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e.message.clone().map(|m| m.to_string()).unwrap_or_default(),
                })
            })
            .collect();

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::Validation(message)
    }
}
