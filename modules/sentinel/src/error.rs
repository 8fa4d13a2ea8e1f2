//! Module-wide error taxonomy
//!
//! Every handler and service funnels into [`AppError`]; the `IntoResponse`
//! impl produces the uniform JSON envelope
//! `{error, message, correlation_id, code}`.
//!
//! DLQ capture is decided by [`AppError::is_dlq_eligible`]: only transient
//! dependency failures and internal errors ever reach the dead-letter queue.
//! Validation, authorization, and business-rule conflicts surface to the
//! caller and stop there.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use resilience::ResilienceError;

/// Errors surfaced by the exception pipeline
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("missing or malformed X-Tenant-Id header")]
    TenantRequired,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::TenantRequired => "TENANT_REQUIRED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimited(_) => "RATE_LIMITED",
            AppError::CircuitOpen(_) => "CIRCUIT_OPEN",
            AppError::Dependency(_) => "DEPENDENCY_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TenantRequired => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::CircuitOpen(_) | AppError::Dependency(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a failure of this class may be captured into the DLQ.
    pub fn is_dlq_eligible(&self) -> bool {
        matches!(
            self,
            AppError::Dependency(_) | AppError::CircuitOpen(_) | AppError::Internal(_)
        )
    }

    /// Whether the resilience retry decorator should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Dependency(_))
    }

    /// Short class name recorded in DLQ rows.
    pub fn class_name(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::TenantRequired => "TenantRequired",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::RateLimited(_) => "RateLimited",
            AppError::CircuitOpen(_) => "CircuitBreakerError",
            AppError::Dependency(_) => "DependencyError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Dependency(format!("database: {other}")),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Dependency(format!("redis: {e}"))
    }
}

impl From<ResilienceError> for AppError {
    fn from(e: ResilienceError) -> Self {
        match e {
            ResilienceError::CircuitOpen { service } => AppError::CircuitOpen(service),
            ResilienceError::RateLimited { key, .. } => AppError::RateLimited(key),
        }
    }
}

/// JSON envelope for every non-2xx response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub code: &'static str,
}

/// An [`AppError`] paired with the request correlation id.
///
/// Handlers build this via [`AppError::with_correlation`] so that every error
/// response carries the id the middleware assigned to the request.
#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub correlation_id: Option<String>,
}

impl AppError {
    pub fn with_correlation(self, correlation_id: impl Into<String>) -> ApiError {
        ApiError {
            error: self,
            correlation_id: Some(correlation_id.into()),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        ApiError {
            error,
            correlation_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = ErrorBody {
            error: self.error.class_name().to_string(),
            message: self.error.to_string(),
            correlation_id: self.correlation_id,
            code: self.error.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
