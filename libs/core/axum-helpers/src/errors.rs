//! Structured HTTP error responses.
//!
//! Every fallible handler in the gateway converges on [`AppError`], which maps
//! cleanly onto the error kinds used throughout the orchestrator: validation
//! failures never mutate state, conflicts are reported with a truthful status
//! rather than a generic 500, and transient store failures are distinguished
//! from genuine internal errors.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Type-safe error codes, stable across releases for client-side matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InvalidUuid,
    NotFound,
    Conflict,
    StoreUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidUuid => "INVALID_UUID",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Standard JSON error envelope returned by every HTTP error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Gateway-wide error type.
///
/// Variants line up with the error kinds in the orchestrator's design: a
/// `Validation` error never mutates state, a `Conflict` reflects a lost race
/// (e.g. claiming an already-claimed job) rather than a server fault, and
/// `StoreUnavailable` is the only variant that indicates the Redis client
/// gave up after its own internal retries.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid request body: {0}")]
    JsonRejection(#[from] JsonRejection),
}

impl From<database::DatabaseError> for AppError {
    fn from(err: database::DatabaseError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::ValidationError),
            AppError::JsonRejection(_) => (StatusCode::BAD_REQUEST, ErrorCode::ValidationError),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorCode::Conflict),
            AppError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::StoreUnavailable)
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        };

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(error_code = code.as_str(), "{}", self);
            }
            _ => tracing::info!(error_code = code.as_str(), "{}", self),
        }

        let body = Json(ErrorResponse {
            error: code.as_str().to_string(),
            message: self.to_string(),
            details: None,
        });

        (status, body).into_response()
    }
}

/// 404 fallback handler for unmatched routes.
pub async fn not_found() -> Response {
    AppError::NotFound("no route matches this path".to_string()).into_response()
}
