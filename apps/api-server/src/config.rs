//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;

use throttle_core::Limit;

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the request through.
    Open,
    /// Reject with 503.
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown failure policy '{0}' (expected 'open' or 'closed')")]
pub struct ParseFailurePolicyError(String);

impl FromStr for FailurePolicy {
    type Err = ParseFailurePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(ParseFailurePolicyError(other.to_string())),
        }
    }
}

/// Rate limit applied to the `/api` scope.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub resource: String,
    pub window_secs: u64,
    pub max_requests: u64,
    /// Honour `Client-IP` / `X-Forwarded-For`. Only safe behind a proxy that overwrites them.
    pub trust_proxy_headers: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            resource: "api".to_string(),
            window_secs: 60,
            max_requests: 100,
            trust_proxy_headers: true,
            failure_policy: FailurePolicy::Closed,
        }
    }
}

impl RateLimitSettings {
    pub fn limit(&self) -> Limit {
        Limit::per_seconds(self.window_secs, self.max_requests)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let failure_policy = match env::var("RATE_LIMIT_FAILURE_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; using {:?}", e, defaults.failure_policy);
                defaults.failure_policy
            }),
            Err(_) => defaults.failure_policy,
        };

        Self {
            resource: env::var("RATE_LIMIT_RESOURCE").unwrap_or(defaults.resource),
            window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.window_secs),
            max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_requests),
            trust_proxy_headers: env::var("TRUST_PROXY_HEADERS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.trust_proxy_headers),
            failure_policy,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Use Redis as the shared counter store.
    pub redis_enabled: bool,
    pub rate_limit: RateLimitSettings,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            redis_enabled: env::var("REDIS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            rate_limit: RateLimitSettings::from_env(),
        }
    }
}
