//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::audit::AuditLogError;
use crate::job_lock::JobLockError;
use crate::jobs::JobError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Job is already running")]
    JobLocked,

    // Server errors (5xx)
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Job lock error: {0}")]
    JobLock(#[from] JobLockError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditLogError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidHeader(header) => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }

            // 409 Conflict
            AppError::JobLocked => (StatusCode::CONFLICT, "job_locked", None),

            // 500 Internal Server Error
            AppError::Job(e) => {
                tracing::error!("Job error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "job_failed", Some(e.to_string()))
            }
            AppError::JobLock(e) => {
                tracing::error!("Job lock error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "job_lock_error", None)
            }
            AppError::Audit(e) => {
                tracing::error!("Audit log error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "audit_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
