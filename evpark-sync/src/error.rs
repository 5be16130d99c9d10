//! Error types for evpark-sync

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of a reconciliation or backfill run
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Another pass holds the single-flight lock
    #[error("a reconciliation pass is already running")]
    AlreadyRunning,

    /// Monitoring store or evidence store failure
    #[error(transparent)]
    Store(#[from] evpark_common::Error),

    /// A blocking filesystem task was cancelled or panicked
    #[error("evidence task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a pass is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// evpark-common error
    #[error("Common error: {0}")]
    Common(#[from] evpark_common::Error),
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::AlreadyRunning => {
                ApiError::Conflict(ReconcileError::AlreadyRunning.to_string())
            }
            ReconcileError::Store(e) => ApiError::Common(e),
            ReconcileError::Task(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
