//! Application state - shared across all handlers.

use std::sync::Arc;

use throttle_core::ports::{CounterStore, StoreError};
use throttle_core::{LimiterConfig, RateLimiter};
use throttle_infra::InMemoryCounterStore;

#[cfg(feature = "redis")]
use throttle_infra::{RedisConfig, RedisCounterStore};

use crate::config::{AppConfig, RateLimitSettings};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub settings: RateLimitSettings,
    /// Set when counters live in this process and need periodic purging.
    pub memory_store: Option<Arc<InMemoryCounterStore>>,
}

impl AppState {
    /// Build the application state with the configured counter store.
    ///
    /// Fails when Redis is required (fallback disabled) but unreachable.
    pub async fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let limiter_config = LimiterConfig::from_env();

        #[cfg(feature = "redis")]
        if config.redis_enabled {
            let redis_config = RedisConfig::from_env();
            let fallback_to_memory = redis_config.fallback_to_memory;

            match RedisCounterStore::new(redis_config).await {
                Ok(store) => {
                    return Ok(Self::with_store(
                        Arc::new(store),
                        limiter_config,
                        config.rate_limit.clone(),
                    ));
                }
                Err(e) if fallback_to_memory => {
                    tracing::error!(
                        "Failed to connect to Redis: {}. Using in-memory counters; limits are per-process.",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        #[cfg(not(feature = "redis"))]
        if config.redis_enabled {
            tracing::warn!("REDIS_ENABLED is set but the redis feature is disabled");
        }

        tracing::info!("Using in-memory counter store");
        Ok(Self::in_memory(limiter_config, config.rate_limit.clone()))
    }

    /// State backed by a fresh in-memory store.
    pub fn in_memory(limiter_config: LimiterConfig, settings: RateLimitSettings) -> Self {
        let store = Arc::new(InMemoryCounterStore::new());
        let mut state = Self::with_store(store.clone(), limiter_config, settings);
        state.memory_store = Some(store);
        state
    }

    pub fn with_store(
        store: Arc<dyn CounterStore>,
        limiter_config: LimiterConfig,
        settings: RateLimitSettings,
    ) -> Self {
        tracing::info!(
            resource = %settings.resource,
            window_secs = settings.window_secs,
            max_requests = settings.max_requests,
            "Application state initialized"
        );

        Self {
            limiter: Arc::new(RateLimiter::new(store, limiter_config)),
            settings,
            memory_store: None,
        }
    }
}
