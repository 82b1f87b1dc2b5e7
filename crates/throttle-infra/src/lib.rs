//! # Throttle Infrastructure
//!
//! Concrete implementations of the counter store port defined in `throttle-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `redis` - Redis counter store with server-side atomic admission

pub mod store;

// Re-exports - In-Memory
pub use store::InMemoryCounterStore;

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use store::{RedisConfig, RedisCounterStore};
