//! Admission outcomes.

use std::time::Duration;

/// Outcome of an admission check.
///
/// A denial is an expected outcome, not an error; store failures are reported
/// separately through [`RateLimitError`](crate::error::RateLimitError).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted {
        /// Counter value after this request.
        count: u64,
        /// Admissions left in the current window.
        remaining: u64,
        reset_after: Duration,
    },
    Denied(Denial),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

/// How a denial was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The caller's fallback ran in place of the default response.
    Fallback,
    /// Default path: "too many requests".
    TooManyRequests { retry_after: Duration },
}

impl Denial {
    /// Retry hint in whole seconds, rounded up so clients never retry early.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Denial::Fallback => None,
            Denial::TooManyRequests { retry_after } => {
                let secs = retry_after.as_secs();
                Some(if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        let denial = Denial::TooManyRequests {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(denial.retry_after_secs(), Some(2));

        let denial = Denial::TooManyRequests {
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(denial.retry_after_secs(), Some(3));

        assert_eq!(Denial::Fallback.retry_after_secs(), None);
    }
}
