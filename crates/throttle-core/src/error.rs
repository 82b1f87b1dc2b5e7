//! Limiter-level error types.

use thiserror::Error;

use crate::ports::StoreError;

/// Errors surfaced by [`RateLimiter`](crate::limiter::RateLimiter).
///
/// Store failures are never turned into an admission; the integrating service
/// picks fail-open or fail-closed.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfiguration(String),
}
