//! In-memory counter store - used as fallback when Redis is unavailable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use throttle_core::ports::{CounterStore, CounterUpdate, StoreError, WindowCounter};

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

impl CounterEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

fn expiry(key: &str, now: Instant, ttl: Duration) -> Result<Instant, StoreError> {
    now.checked_add(ttl).ok_or_else(|| StoreError::InvalidValue {
        key: key.to_string(),
        value: format!("ttl {:?}", ttl),
    })
}

/// In-memory counter store using a HashMap behind an async RwLock.
///
/// Every mutation happens under the write lock, so check-and-increment is
/// atomic across tasks. Note: counters are per-process, not shared across
/// instances, and are lost on restart.
pub struct InMemoryCounterStore {
    store: RwLock<HashMap<String, CounterEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired counters. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut store = self.store.write().await;
        let now = Instant::now();
        let before = store.len();
        store.retain(|_, entry| entry.is_live(now));
        before - store.len()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let store = self.store.read().await;
        Ok(store
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }

    async fn create(&self, key: &str, initial_count: u64, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = expiry(key, Instant::now(), ttl)?;
        let mut store = self.store.write().await;

        store.insert(
            key.to_string(),
            CounterEntry {
                count: initial_count,
                expires_at,
            },
        );

        Ok(())
    }

    async fn read(&self, key: &str) -> Result<WindowCounter, StoreError> {
        let store = self.store.read().await;
        let now = Instant::now();

        match store.get(key) {
            Some(entry) if entry.is_live(now) => Ok(WindowCounter {
                count: entry.count,
                remaining: entry.expires_at - now,
            }),
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn increment_preserving_ttl(
        &self,
        key: &str,
        remaining: Duration,
    ) -> Result<u64, StoreError> {
        let mut store = self.store.write().await;
        let now = Instant::now();
        let expires_at = expiry(key, now, remaining)?;

        match store.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.count += 1;
                entry.expires_at = expires_at;
                Ok(entry.count)
            }
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<CounterUpdate, StoreError> {
        let mut store = self.store.write().await;
        let now = Instant::now();

        if let Some(entry) = store.get_mut(key).filter(|entry| entry.is_live(now)) {
            let remaining = entry.expires_at - now;

            if entry.count > max_requests {
                return Ok(CounterUpdate {
                    admitted: false,
                    count: entry.count,
                    remaining,
                    created: false,
                });
            }

            // Only the count changes; expires_at stays put so the window is fixed.
            entry.count += 1;
            return Ok(CounterUpdate {
                admitted: true,
                count: entry.count,
                remaining,
                created: false,
            });
        }

        store.insert(
            key.to_string(),
            CounterEntry {
                count: 1,
                expires_at: expiry(key, now, window)?,
            },
        );

        Ok(CounterUpdate {
            admitted: true,
            count: 1,
            remaining: window,
            created: true,
        })
    }
}
