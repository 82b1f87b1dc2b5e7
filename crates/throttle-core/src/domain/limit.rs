//! Per-call limit parameters.

use std::time::Duration;

use crate::error::RateLimitError;

/// Longest window any store can represent as a millisecond TTL.
pub const MAX_INTERVAL: Duration = Duration::from_millis(i64::MAX as u64);

/// A fixed-window budget: at most `max_requests + 1` admissions per `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub interval: Duration,
    pub max_requests: u64,
}

impl Limit {
    pub fn new(interval: Duration, max_requests: u64) -> Self {
        Self {
            interval,
            max_requests,
        }
    }

    /// Window length in whole seconds.
    pub fn per_seconds(interval_secs: u64, max_requests: u64) -> Self {
        Self::new(Duration::from_secs(interval_secs), max_requests)
    }

    /// Reject a zero-length window, or one too long to store as a TTL.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.interval.is_zero() {
            return Err(RateLimitError::InvalidConfiguration(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.interval > MAX_INTERVAL {
            return Err(RateLimitError::InvalidConfiguration(format!(
                "interval must not exceed {}ms",
                MAX_INTERVAL.as_millis()
            )));
        }
        Ok(())
    }

    /// Admissions left once the counter has reached `count`.
    ///
    /// A zero budget admits nothing, so it always reports 0.
    pub fn remaining_after(&self, count: u64) -> u64 {
        if self.max_requests == 0 {
            return 0;
        }
        self.max_requests.saturating_add(1).saturating_sub(count)
    }
}
