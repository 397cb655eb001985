// crates/server/src/error.rs
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use nvr_db::DbError;
use nvr_server_jobs::{JobError, SubmitError};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Recording not found: {0}")]
    RecordingNotFound(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        /// Seconds, sent as `Retry-After` when set.
        retry_after: Option<u64>,
    },
}

impl ApiError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable {
            message: message.into(),
            retry_after: None,
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(msg) => ApiError::BadRequest(msg),
            SubmitError::Capacity(msg) => ApiError::unavailable(msg),
            SubmitError::ShuttingDown => ApiError::unavailable("Server is shutting down"),
            SubmitError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::JobNotFound(id.to_string()),
            JobError::NotReady { status, .. } => ApiError::Conflict(format!("Job is {status}")),
            JobError::Capacity { .. } => ApiError::unavailable(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::debug!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
            ApiError::RecordingNotFound(id) => {
                tracing::warn!(recording_id = id, "Recording not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details(
                        "Recording not found",
                        format!("Recording ID: {}", id),
                    ),
                )
            }
            ApiError::NotFound(msg) => {
                tracing::warn!(message = %msg, "Not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Not found", msg.clone()),
                )
            }
            ApiError::Database(db_err) => {
                tracing::error!(error = %db_err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Database error", db_err.to_string()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "Conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Conflict", msg.clone()),
                )
            }
            ApiError::Forbidden(msg) => {
                tracing::warn!(message = %msg, "Forbidden");
                (
                    StatusCode::FORBIDDEN,
                    ErrorResponse::with_details("Forbidden", msg.clone()),
                )
            }
            ApiError::ServiceUnavailable {
                message,
                retry_after,
            } => {
                tracing::warn!(message = %message, "Service unavailable");
                let body = ErrorResponse::with_details("Service unavailable", message.clone());
                let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
                if let Some(secs) = retry_after {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, header::HeaderValue::from(*secs));
                }
                return response;
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
