//! # Error Types
//!
//! Crate-wide error taxonomy shared by the HTTP API, the WebSocket gateway,
//! and the room hub. Every user-visible failure carries an [`ErrorCode`] that
//! is serialized into the standard `{success: false, error, code}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate.
pub type AppResult<T> = Result<T, AppError>;

// ============================================================================
// Error Codes
// ============================================================================

/// Machine-readable error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or out-of-range input.
    Validation,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Referenced entity does not exist.
    NotFound,
    /// State conflict (duplicate email, duplicate join).
    Conflict,
    /// A rate-limit ceiling was hit.
    RateLimited,
    /// Another execution is in flight for the room.
    Busy,
    /// Wrong password for a private room.
    BadPassword,
    /// Room is at capacity.
    Full,
    /// Edit batch referenced positions outside the buffer.
    InvalidEdit,
    /// Source failed to compile.
    CompilationError,
    /// Program exited non-zero.
    RuntimeError,
    /// Wall-clock deadline elapsed.
    Timeout,
    /// Memory cap was hit.
    MemoryLimit,
    /// Pre-flight security scan rejected the source.
    SecurityBlock,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorCode {
    /// HTTP status the code maps onto.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::Validation | ErrorCode::InvalidEdit => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized | ErrorCode::BadPassword => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden | ErrorCode::SecurityBlock => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict | ErrorCode::Busy | ErrorCode::Full => StatusCode::CONFLICT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::CompilationError
            | ErrorCode::RuntimeError
            | ErrorCode::Timeout
            | ErrorCode::MemoryLimit => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// Application Error
// ============================================================================

/// Application-level error with a user-visible message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("an execution is already running for this room")]
    Busy,

    #[error("incorrect room password")]
    BadPassword,

    #[error("room is full")]
    Full,

    #[error("edit does not fit the current buffer")]
    InvalidEdit,

    #[error("security scan rejected the submitted code: {0}")]
    SecurityBlock(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::Validation,
            AppError::Unauthorized => ErrorCode::Unauthorized,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Busy => ErrorCode::Busy,
            AppError::BadPassword => ErrorCode::BadPassword,
            AppError::Full => ErrorCode::Full,
            AppError::InvalidEdit => ErrorCode::InvalidEdit,
            AppError::SecurityBlock(_) => ErrorCode::SecurityBlock,
            AppError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Shorthand for an internal error from any displayable cause.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record"),
            other => {
                tracing::error!(error = %other, "repository failure");
                AppError::Internal("storage unavailable, retry shortly".to_string())
            }
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(error = %err, "redis failure");
        AppError::Internal("cache unavailable, retry shortly".to_string())
    }
}

// ============================================================================
// HTTP Response Mapping
// ============================================================================

/// Serialized failure envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let retry_after_secs = match &self {
            AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        // Internal causes are logged, never leaked verbatim.
        if code == ErrorCode::Internal {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            code,
            retry_after_secs,
        };

        (code.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(AppError::Busy.code(), ErrorCode::Busy);
        assert_eq!(AppError::Full.code(), ErrorCode::Full);
        assert_eq!(
            AppError::Validation("bad".into()).code(),
            ErrorCode::Validation
        );
        assert_eq!(AppError::InvalidEdit.code(), ErrorCode::InvalidEdit);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Full.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::BadPassword.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Timeout.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::BadPassword).unwrap();
        assert_eq!(json, "\"bad_password\"");
        let json = serde_json::to_string(&ErrorCode::MemoryLimit).unwrap();
        assert_eq!(json, "\"memory_limit\"");
    }

    #[test]
    fn test_rate_limited_body_carries_hint() {
        let err = AppError::RateLimited { retry_after_secs: 42 };
        assert!(err.to_string().contains("42"));
    }
}
