//! Redis counter store implementation.
//!
//! Admission runs as one Lua script on the server, so concurrent requests
//! from any number of instances serialize on the key. TTLs are kept in
//! milliseconds (`PX`/`PTTL`/`PEXPIRE`).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};

use throttle_core::ports::{CounterStore, CounterUpdate, StoreError, WindowCounter};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on every command
    pub command_timeout: Duration,
    /// Whether to fallback to the in-memory store if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_millis(500),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            command_timeout: Duration::from_millis(
                std::env::var("REDIS_COMMAND_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Returns: [count, pttl_ms, admitted, created]
const CHECK_AND_INCREMENT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])

local current = redis.call('GET', key)
if not current then
    redis.call('SET', key, 1, 'PX', window_ms)
    return {1, window_ms, 1, 1}
end

local count = tonumber(current)
if not count then
    return redis.error_reply('counter value is not an integer')
end

local ttl = redis.call('PTTL', key)
if ttl < 0 then
    redis.call('PEXPIRE', key, window_ms)
    ttl = window_ms
end

if count > max_requests then
    return {count, ttl, 0, 0}
end

-- INCR keeps the existing TTL.
count = redis.call('INCR', key)
return {count, ttl, 1, 0}
"#;

/// Returns the new count, or -1 if the key is gone.
const INCREMENT_PRESERVING_TTL: &str = r#"
local key = KEYS[1]
if redis.call('EXISTS', key) == 0 then
    return -1
end

local count = redis.call('INCR', key)
redis.call('PEXPIRE', key, tonumber(ARGV[1]))
return count
"#;

/// Redis-backed counter store.
///
/// Uses connection manager for automatic reconnection and pooling.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: RedisConfig,
    admit_script: Script,
    increment_script: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| StoreError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Connection("Connection timed out".to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            config,
            admit_script: Script::new(CHECK_AND_INCREMENT),
            increment_script: Script::new(INCREMENT_PRESERVING_TTL),
        })
    }

    async fn bounded<T>(
        &self,
        key: &str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Redis command failed");
                Err(store_error(e))
            }
            Err(_) => {
                tracing::warn!(key = %key, "Redis command timed out");
                Err(StoreError::Timeout(self.config.command_timeout))
            }
        }
    }
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Operation(e.to_string())
    }
}

/// TTL in milliseconds as Redis accepts it: a positive signed 64-bit integer.
fn millis(key: &str, duration: Duration) -> Result<i64, StoreError> {
    i64::try_from(duration.as_millis())
        .map(|ms| ms.max(1))
        .map_err(|_| StoreError::InvalidValue {
            key: key.to_string(),
            value: format!("ttl {:?}", duration),
        })
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(key, conn.exists::<_, bool>(key)).await
    }

    async fn create(&self, key: &str, initial_count: u64, ttl: Duration) -> Result<(), StoreError> {
        let ttl_ms = millis(key, ttl)?;
        let mut conn = self.conn.clone();
        self.bounded(key, conn.pset_ex::<_, _, ()>(key, initial_count, ttl_ms.unsigned_abs()))
            .await
    }

    async fn read(&self, key: &str) -> Result<WindowCounter, StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().get(key).pttl(key);

        let (value, pttl): (Option<String>, i64) =
            self.bounded(key, pipe.query_async(&mut conn)).await?;

        let value = value.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let count = value.parse::<u64>().map_err(|_| StoreError::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
        })?;

        let remaining = match pttl {
            -2 => return Err(StoreError::NotFound(key.to_string())),
            -1 => {
                tracing::warn!(key = %key, "Counter has no expiry");
                Duration::MAX
            }
            ms => Duration::from_millis(ms as u64),
        };

        Ok(WindowCounter { count, remaining })
    }

    async fn increment_preserving_ttl(
        &self,
        key: &str,
        remaining: Duration,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.increment_script.key(key);
        invocation.arg(millis(key, remaining)?);

        let count: i64 = self.bounded(key, invocation.invoke_async(&mut conn)).await?;
        if count < 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }

        Ok(count as u64)
    }

    async fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<CounterUpdate, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.admit_script.key(key);
        invocation.arg(millis(key, window)?).arg(max_requests);

        let result: Vec<i64> = self.bounded(key, invocation.invoke_async(&mut conn)).await?;

        match result.as_slice() {
            [count, ttl_ms, admitted, created] => Ok(CounterUpdate {
                admitted: *admitted == 1,
                count: (*count).max(0) as u64,
                remaining: Duration::from_millis((*ttl_ms).max(0) as u64),
                created: *created == 1,
            }),
            other => Err(StoreError::Operation(format!(
                "Unexpected script reply: {:?}",
                other
            ))),
        }
    }
}
