//! Counter store port.

use async_trait::async_trait;
use std::time::Duration;

/// Counter store trait - abstraction over shared TTL-capable key-value stores
/// (Redis, in-memory).
///
/// Keys are the encoded form of a [`RateLimitKey`](crate::domain::RateLimitKey).
/// Every mutating operation applies the count and the TTL together or not at all.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Check if a live (non-expired) counter exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set the counter value and TTL, overwriting any prior value.
    async fn create(&self, key: &str, initial_count: u64, ttl: Duration) -> Result<(), StoreError>;

    /// Read the current count and remaining TTL.
    ///
    /// Fails with [`StoreError::NotFound`] if the key expired in the meantime.
    async fn read(&self, key: &str) -> Result<WindowCounter, StoreError>;

    /// Increment the counter by one and re-apply `remaining` as its TTL.
    /// Returns the new count.
    async fn increment_preserving_ttl(
        &self,
        key: &str,
        remaining: Duration,
    ) -> Result<u64, StoreError>;

    /// Atomically admit one request against a fixed window.
    ///
    /// - no live counter: create it with count 1 and TTL `window`, admitted
    /// - `count > max_requests`: not admitted, counter left untouched
    /// - otherwise: increment with the TTL preserved, admitted
    async fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<CounterUpdate, StoreError>;
}

/// Snapshot of a window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u64,
    pub remaining: Duration,
}

/// Result of an atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    pub admitted: bool,
    /// Count after the operation (unchanged when not admitted).
    pub count: u64,
    /// Time left in the current window.
    pub remaining: Duration,
    /// True when this call opened a new window.
    pub created: bool,
}

/// Counter store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Counter not found: {0}")]
    NotFound(String),

    #[error("Invalid counter value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Operation failed: {0}")]
    Operation(String),
}
