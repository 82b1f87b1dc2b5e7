//! # Throttle Core
//!
//! The domain layer of Throttle: a fixed-window, per-client, per-resource rate
//! limiter over a shared TTL counter store.
//! This crate has no infrastructure dependencies; stores implement the ports.

pub mod domain;
pub mod error;
pub mod limiter;
pub mod ports;

pub use domain::{ClientIdentity, Decision, Denial, Limit, RateLimitKey};
pub use error::RateLimitError;
pub use limiter::{LimiterConfig, RateLimiter};
