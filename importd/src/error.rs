//! Error types for importd
//!
//! `ImportError` is the coordinator's typed outcome for everything that can
//! go wrong around a run. `ApiError` maps those outcomes (plus gateway-level
//! failures) onto HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Coordinator error type
#[derive(Debug, Error)]
pub enum ImportError {
    /// Missing or invalid configuration (unknown cadence, bad source kind, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source could not be reached or opened
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Another run holds the lock
    #[error("An import is already running")]
    LockContention { holder: Option<Uuid> },

    /// Structural validation failed; messages are operator-facing
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A single record failed; counted, never fatal on its own
    #[error("Row {row} failed: {message}")]
    RowProcessing { row: u64, message: String },

    /// Unrecoverable failure during processing
    #[error("Import failed: {0}")]
    FatalRun(String),

    /// Caller failed authentication or confirmation
    #[error("Unauthorized: {0}")]
    Authorization(String),

    /// Required collaborator missing at startup
    #[error("Missing collaborator: {0}")]
    Activation(String),

    /// Cancel requested but no matching run is active
    #[error("No matching import is running")]
    NotRunning,

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] importd_common::Error),
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        ImportError::Store(importd_common::Error::Database(err))
    }
}

impl ImportError {
    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Config(_) => "CONFIG_ERROR",
            ImportError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            ImportError::LockContention { .. } => "LOCK_CONTENTION",
            ImportError::Validation(_) => "VALIDATION_FAILED",
            ImportError::RowProcessing { .. } => "ROW_PROCESSING",
            ImportError::FatalRun(_) => "FATAL_RUN",
            ImportError::Authorization(_) => "UNAUTHORIZED",
            ImportError::Activation(_) => "ACTIVATION_ERROR",
            ImportError::NotRunning => "NOT_RUNNING",
            ImportError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ImportError::LockContention { .. } | ImportError::NotRunning => StatusCode::CONFLICT,
            ImportError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ImportError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ImportError::Authorization(_) => StatusCode::UNAUTHORIZED,
            ImportError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Coordinator outcome
    #[error(transparent)]
    Import(#[from] ImportError),

    /// importd-common error
    #[error("Common error: {0}")]
    Common(#[from] importd_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Import(ref err) => (err.status_code(), err.code(), err.to_string()),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
            "error": {
                "code": error_code,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
