//! Error handling middleware - RFC 7807 compliant responses.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use std::fmt;
use throttle_core::RateLimitError;
use throttle_shared::ErrorResponse;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    TooManyRequests { retry_after_secs: u64 },
    ServiceUnavailable(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::TooManyRequests { retry_after_secs } => {
                write!(f, "Too many requests, retry after {}s", retry_after_secs)
            }
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());

        let error = match self {
            AppError::TooManyRequests { retry_after_secs } => {
                builder
                    .insert_header(("Retry-After", retry_after_secs.to_string()))
                    .insert_header(("X-RateLimit-Remaining", "0"));
                ErrorResponse::too_many_requests(*retry_after_secs)
            }
            AppError::ServiceUnavailable(detail) => ErrorResponse::service_unavailable(detail),
            AppError::Internal(detail) => {
                // Log internal errors
                tracing::error!("Internal error: {}", detail);
                ErrorResponse::internal_error()
            }
        };

        builder.json(error)
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::StoreUnavailable(e) => {
                tracing::error!("Counter store error: {}", e);
                AppError::ServiceUnavailable("Rate limiter unavailable".to_string())
            }
            RateLimitError::InvalidConfiguration(msg) => AppError::Internal(msg),
        }
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;
