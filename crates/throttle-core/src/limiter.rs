//! Fixed-window rate limiter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ClientIdentity, Decision, Denial, Limit, RateLimitKey};
use crate::error::RateLimitError;
use crate::ports::{CounterStore, CounterUpdate, StoreError, WindowCounter};

/// Limiter configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Prefix for every store key.
    pub key_prefix: String,
    /// Upper bound on each store call.
    pub store_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: "ratelimit".to_string(),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl LimiterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "ratelimit".to_string()),
            store_timeout: Duration::from_millis(
                std::env::var("RATE_LIMIT_STORE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
        }
    }
}

/// Per-client, per-resource fixed-window rate limiter.
///
/// Holds no counter state of its own: every decision is a single atomic
/// [`CounterStore::check_and_increment`] against the shared store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: LimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: LimiterConfig) -> Self {
        Self { store, config }
    }

    /// Admit or deny one request from `identity` against `resource`.
    ///
    /// The first request of a window opens it; afterwards a request is denied
    /// once the stored count exceeds `limit.max_requests`, so `max_requests + 1`
    /// requests are admitted per window. Denials do not touch the counter.
    pub async fn admit(
        &self,
        identity: &ClientIdentity,
        resource: &str,
        limit: Limit,
    ) -> Result<Decision, RateLimitError> {
        self.admit_with(identity, resource, limit, None::<fn()>).await
    }

    /// Like [`admit`](Self::admit), but runs `fallback` exactly once on denial
    /// instead of producing the default "too many requests" outcome.
    pub async fn admit_or_else<F>(
        &self,
        identity: &ClientIdentity,
        resource: &str,
        limit: Limit,
        fallback: F,
    ) -> Result<Decision, RateLimitError>
    where
        F: FnOnce(),
    {
        self.admit_with(identity, resource, limit, Some(fallback)).await
    }

    async fn admit_with<F>(
        &self,
        identity: &ClientIdentity,
        resource: &str,
        limit: Limit,
        fallback: Option<F>,
    ) -> Result<Decision, RateLimitError>
    where
        F: FnOnce(),
    {
        limit.validate()?;
        let key = RateLimitKey::new(resource, identity.clone())?;

        // A zero budget denies everything, including the first request of a window.
        let update = if limit.max_requests == 0 {
            None
        } else {
            Some(self.check_and_increment(&key, limit).await?)
        };

        match update {
            Some(update) if update.admitted => {
                if update.created {
                    tracing::debug!(
                        key = %key,
                        window_secs = limit.interval.as_secs(),
                        "Opened rate limit window"
                    );
                }

                Ok(Decision::Admitted {
                    count: update.count,
                    remaining: limit.remaining_after(update.count),
                    reset_after: update.remaining,
                })
            }
            _ => {
                let retry_after = update.map_or(limit.interval, |u| u.remaining);

                tracing::debug!(
                    key = %key,
                    max_requests = limit.max_requests,
                    retry_after = ?retry_after,
                    "Rate limit exceeded"
                );

                match fallback {
                    Some(fallback) => {
                        fallback();
                        Ok(Decision::Denied(Denial::Fallback))
                    }
                    None => Ok(Decision::Denied(Denial::TooManyRequests { retry_after })),
                }
            }
        }
    }

    /// Current window for `identity` on `resource`, if one is open.
    pub async fn window(
        &self,
        identity: &ClientIdentity,
        resource: &str,
    ) -> Result<Option<WindowCounter>, RateLimitError> {
        let key = RateLimitKey::new(resource, identity.clone())?;
        let store_key = key.encode(&self.config.key_prefix);

        if !self.bounded(self.store.exists(&store_key)).await? {
            return Ok(None);
        }

        match self.bounded(self.store.read(&store_key)).await {
            Ok(counter) => Ok(Some(counter)),
            // Expired between the two calls.
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        limit: Limit,
    ) -> Result<CounterUpdate, RateLimitError> {
        let store = Arc::clone(&self.store);
        let store_key = key.encode(&self.config.key_prefix);

        // Detached so that a cancelled caller never abandons a mutation halfway.
        let task = tokio::spawn(async move {
            store
                .check_and_increment(&store_key, limit.interval, limit.max_requests)
                .await
        });

        let result = match tokio::time::timeout(self.config.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Operation(format!("Store task failed: {}", e))),
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        };

        result.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Counter store unavailable");
            RateLimitError::StoreUnavailable(e)
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.config.store_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Returns a canned update and records the keys it was called with.
    struct ScriptedStore {
        update: CounterUpdate,
        keys: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn new(admitted: bool, count: u64) -> Arc<Self> {
            Arc::new(Self {
                update: CounterUpdate {
                    admitted,
                    count,
                    remaining: Duration::from_secs(42),
                    created: count == 1,
                },
                keys: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.keys.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CounterStore for ScriptedStore {
        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn create(&self, _key: &str, _count: u64, _ttl: Duration) -> Result<(), StoreError> {
            Ok(())
        }

        async fn read(&self, key: &str) -> Result<WindowCounter, StoreError> {
            Err(StoreError::NotFound(key.to_string()))
        }

        async fn increment_preserving_ttl(
            &self,
            _key: &str,
            _remaining: Duration,
        ) -> Result<u64, StoreError> {
            Ok(self.update.count + 1)
        }

        async fn check_and_increment(
            &self,
            key: &str,
            _window: Duration,
            _max_requests: u64,
        ) -> Result<CounterUpdate, StoreError> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(self.update)
        }
    }

    /// Fails every call, or hangs when `hang` is set.
    struct BrokenStore {
        hang: bool,
    }

    impl BrokenStore {
        async fn fail<T>(&self) -> Result<T, StoreError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Err(StoreError::Connection("connection refused".to_string()))
        }
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            self.fail().await
        }

        async fn create(&self, _key: &str, _count: u64, _ttl: Duration) -> Result<(), StoreError> {
            self.fail().await
        }

        async fn read(&self, _key: &str) -> Result<WindowCounter, StoreError> {
            self.fail().await
        }

        async fn increment_preserving_ttl(
            &self,
            _key: &str,
            _remaining: Duration,
        ) -> Result<u64, StoreError> {
            self.fail().await
        }

        async fn check_and_increment(
            &self,
            _key: &str,
            _window: Duration,
            _max_requests: u64,
        ) -> Result<CounterUpdate, StoreError> {
            self.fail().await
        }
    }

    /// Holds each admission until released, then commits it.
    struct GatedStore {
        release: Notify,
        committed: Notify,
        count: AtomicU64,
    }

    #[async_trait]
    impl CounterStore for GatedStore {
        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(self.count.load(Ordering::SeqCst) > 0)
        }

        async fn create(&self, _key: &str, count: u64, _ttl: Duration) -> Result<(), StoreError> {
            self.count.store(count, Ordering::SeqCst);
            Ok(())
        }

        async fn read(&self, _key: &str) -> Result<WindowCounter, StoreError> {
            Ok(WindowCounter {
                count: self.count.load(Ordering::SeqCst),
                remaining: Duration::from_secs(60),
            })
        }

        async fn increment_preserving_ttl(
            &self,
            _key: &str,
            _remaining: Duration,
        ) -> Result<u64, StoreError> {
            Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn check_and_increment(
            &self,
            _key: &str,
            window: Duration,
            _max_requests: u64,
        ) -> Result<CounterUpdate, StoreError> {
            self.release.notified().await;
            let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            self.committed.notify_one();

            Ok(CounterUpdate {
                admitted: true,
                count,
                remaining: window,
                created: count == 1,
            })
        }
    }

    fn client() -> ClientIdentity {
        ClientIdentity::parse("192.0.2.10").unwrap()
    }

    fn limiter(store: Arc<dyn CounterStore>) -> RateLimiter {
        RateLimiter::new(store, LimiterConfig::default())
    }

    #[tokio::test]
    async fn test_admitted_decision() {
        let store = ScriptedStore::new(true, 2);
        let limiter = limiter(store.clone());

        let decision = limiter
            .admit(&client(), "api", Limit::per_seconds(60, 5))
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Admitted {
                count: 2,
                remaining: 4,
                reset_after: Duration::from_secs(42),
            }
        );
        assert_eq!(
            store.keys.lock().unwrap().as_slice(),
            ["ratelimit:api:v4-c000020a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_denied_defaults_to_too_many_requests() {
        let limiter = limiter(ScriptedStore::new(false, 6));

        let decision = limiter
            .admit(&client(), "api", Limit::per_seconds(60, 5))
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Denied(Denial::TooManyRequests {
                retry_after: Duration::from_secs(42),
            })
        );
    }

    #[tokio::test]
    async fn test_fallback_runs_once_on_denial() {
        let limiter = limiter(ScriptedStore::new(false, 6));
        let calls = AtomicUsize::new(0);

        let decision = limiter
            .admit_or_else(&client(), "api", Limit::per_seconds(60, 5), || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(decision, Decision::Denied(Denial::Fallback));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_not_run_when_admitted() {
        let limiter = limiter(ScriptedStore::new(true, 1));
        let calls = AtomicUsize::new(0);

        let decision = limiter
            .admit_or_else(&client(), "api", Limit::per_seconds(60, 5), || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(decision.is_admitted());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_budget_denies_without_store_io() {
        let store = ScriptedStore::new(true, 1);
        let limiter = limiter(store.clone());

        let decision = limiter
            .admit(&client(), "api", Limit::per_seconds(30, 0))
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Denied(Denial::TooManyRequests {
                retry_after: Duration::from_secs(30),
            })
        );
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        let store = ScriptedStore::new(true, 1);
        let limiter = limiter(store.clone());

        let err = limiter
            .admit(&client(), "", Limit::per_seconds(60, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::InvalidConfiguration(_)));

        let err = limiter
            .admit(&client(), "api", Limit::per_seconds(0, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::InvalidConfiguration(_)));

        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        let limiter = limiter(Arc::new(BrokenStore { hang: false }));

        let err = limiter
            .admit(&client(), "api", Limit::per_seconds(60, 5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RateLimitError::StoreUnavailable(StoreError::Connection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_call_is_bounded() {
        let limiter = limiter(Arc::new(BrokenStore { hang: true }));

        let err = limiter
            .admit(&client(), "api", Limit::per_seconds(60, 5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::StoreUnavailable(StoreError::Timeout(_))
        ));

        let err = limiter.window(&client(), "api").await.unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::StoreUnavailable(StoreError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_abandon_increment() {
        let store = Arc::new(GatedStore {
            release: Notify::new(),
            committed: Notify::new(),
            count: AtomicU64::new(0),
        });
        let limiter = limiter(store.clone());

        // The caller gives up while the store is still working.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            limiter.admit(&client(), "api", Limit::per_seconds(60, 5)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(store.count.load(Ordering::SeqCst), 0);

        store.release.notify_one();
        store.committed.notified().await;

        assert_eq!(store.count.load(Ordering::SeqCst), 1);
        let window = limiter.window(&client(), "api").await.unwrap();
        assert_eq!(window.map(|w| w.count), Some(1));
    }

    #[tokio::test]
    async fn test_window_tolerates_expiry_between_exists_and_read() {
        let limiter = limiter(ScriptedStore::new(true, 1));

        let window = limiter.window(&client(), "api").await.unwrap();
        assert_eq!(window, None);
    }
}
