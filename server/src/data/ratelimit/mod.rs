//! Token-bucket rate limiting
//!
//! Buckets live in a pluggable [`BucketStore`]:
//! - In-memory (default) - per-process table on dashmap
//! - Redis - shared across instances, one Lua script per decision
//!
//! Store failures and timeouts deny the request.

mod backend;
mod bucket;
mod error;
mod key;
mod memory;
mod rate;
mod redis;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use backend::BucketStore;
pub use bucket::{BucketOutcome, TokenBucket};
pub use error::RateLimitError;
pub use key::BucketKey;
pub use memory::InMemoryBucketStore;
pub use rate::{Rate, RateParseError};
pub use redis::{RedisBucketStore, sanitize_redis_url};

use crate::core::config::{RateLimitBackend, RateLimitConfig};

/// Operation class a bucket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Settings,
    Audit,
    Health,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Audit => "audit",
            Self::Health => "health",
        }
    }
}

/// Source of wall-clock time in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "System clock is before UNIX epoch");
                0.0
            })
    }
}

/// Configured rate per scope
#[derive(Debug, Clone, Copy)]
pub struct ScopeRates {
    pub settings: Rate,
    pub audit: Rate,
    pub health: Rate,
}

impl ScopeRates {
    pub fn get(&self, scope: Scope) -> &Rate {
        match scope {
            Scope::Settings => &self.settings,
            Scope::Audit => &self.audit,
            Scope::Health => &self.health,
        }
    }
}

impl From<&RateLimitConfig> for ScopeRates {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            settings: config.settings,
            audit: config.audit,
            health: config.health,
        }
    }
}

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the bucket is full (allowed) or holds a token again (denied)
    pub reset_after_secs: f64,
    /// Unix timestamp matching `reset_after_secs`
    pub reset_at: u64,
    /// Whole seconds to wait, only when denied
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    fn from_outcome(outcome: BucketOutcome, rate: &Rate, now: f64) -> Self {
        let retry_after = (!outcome.allowed).then(|| (outcome.reset_after.ceil() as u64).max(1));
        Self {
            allowed: outcome.allowed,
            remaining: outcome.remaining,
            limit: rate.capacity,
            reset_after_secs: outcome.reset_after,
            reset_at: (now + outcome.reset_after).ceil().max(0.0) as u64,
            retry_after,
        }
    }

    /// Denial used when the store cannot answer
    fn unavailable(rate: &Rate, now: f64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit: rate.capacity,
            reset_after_secs: 1.0,
            reset_at: (now + 1.0).ceil().max(0.0) as u64,
            retry_after: Some(1),
        }
    }
}

/// Rate limiter over a bucket store
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    rates: ScopeRates,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.store.backend_name())
            .field("rates", &self.rates)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RateLimiter {
    /// Build the limiter and its store from configuration
    pub async fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let store: Arc<dyn BucketStore> = match config.backend {
            RateLimitBackend::Memory => {
                tracing::debug!("Initializing in-memory rate limit store");
                Arc::new(InMemoryBucketStore::new())
            }
            RateLimitBackend::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    RateLimitError::Config("redis_url required for Redis backend".into())
                })?;
                Arc::new(RedisBucketStore::new(url).await?)
            }
        };

        Ok(Self::new(
            store,
            ScopeRates::from(config),
            Duration::from_millis(config.timeout_ms),
            Arc::new(SystemClock),
        ))
    }

    pub fn new(
        store: Arc<dyn BucketStore>,
        rates: ScopeRates,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            rates,
            timeout,
            clock,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn rate(&self, scope: Scope) -> &Rate {
        self.rates.get(scope)
    }

    /// Whether the store answers within the request timeout
    pub async fn is_healthy(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.store.health_check()).await,
            Ok(Ok(()))
        )
    }

    /// Take one token for `identity` in `scope`
    pub async fn check(&self, scope: Scope, identity: &str) -> RateLimitDecision {
        let key = BucketKey::bucket(scope, identity);
        let rate = self.rates.get(scope);
        let now = self.clock.now();

        let result = match tokio::time::timeout(self.timeout, self.store.take(&key, rate, now)).await
        {
            Ok(result) => result,
            Err(_) => Err(RateLimitError::Timeout {
                timeout_ms: self.timeout.as_millis().try_into().unwrap_or(u64::MAX),
            }),
        };

        let decision = match result {
            Ok(outcome) => RateLimitDecision::from_outcome(outcome, rate, now),
            Err(e) => {
                tracing::error!(
                    scope = scope.as_str(),
                    backend = self.store.backend_name(),
                    error = %e,
                    "Rate limit store failed, denying request"
                );
                RateLimitDecision::unavailable(rate, now)
            }
        };

        tracing::trace!(
            scope = scope.as_str(),
            %identity,
            allowed = decision.allowed,
            remaining = decision.remaining,
            limit = decision.limit,
            "Rate limit check"
        );

        decision
    }
}


#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::testing::*;
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl BucketStore for FailingStore {
        async fn take(
            &self,
            _key: &str,
            _rate: &Rate,
            _now: f64,
        ) -> Result<BucketOutcome, RateLimitError> {
            Err(RateLimitError::Connection("connection refused".into()))
        }

        async fn health_check(&self) -> Result<(), RateLimitError> {
            Err(RateLimitError::Connection("connection refused".into()))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    struct StalledStore;

    #[async_trait]
    impl BucketStore for StalledStore {
        async fn take(
            &self,
            _key: &str,
            _rate: &Rate,
            _now: f64,
        ) -> Result<BucketOutcome, RateLimitError> {
            std::future::pending().await
        }

        async fn health_check(&self) -> Result<(), RateLimitError> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_three_per_minute_sequence() {
        let (limiter, _clock) = memory_limiter("3/minute");

        let mut seen = Vec::new();
        for _ in 0..4 {
            let d = limiter.check(Scope::Settings, "10.0.0.1").await;
            seen.push((d.allowed, d.remaining, d.retry_after.is_some()));
        }
        assert_eq!(
            seen,
            vec![
                (true, 2, false),
                (true, 1, false),
                (true, 0, false),
                (false, 0, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_denied_then_refilled() {
        let (limiter, clock) = memory_limiter("1/minute");

        assert!(limiter.check(Scope::Settings, "a").await.allowed);
        let denied = limiter.check(Scope::Settings, "a").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(60));
        assert_eq!(denied.limit, 1);

        clock.advance(60.0);
        assert!(limiter.check(Scope::Settings, "a").await.allowed);
    }

    #[tokio::test]
    async fn test_identities_and_scopes_are_independent() {
        let (limiter, _clock) = memory_limiter("1/minute");

        assert!(limiter.check(Scope::Settings, "a").await.allowed);
        assert!(!limiter.check(Scope::Settings, "a").await.allowed);
        assert!(limiter.check(Scope::Settings, "b").await.allowed);
        assert!(limiter.check(Scope::Audit, "a").await.allowed);
    }

    #[tokio::test]
    async fn test_reset_at_is_in_the_future() {
        let (limiter, clock) = memory_limiter("3/minute");
        let d = limiter.check(Scope::Settings, "a").await;
        assert_eq!(d.reset_at, (clock.now() + 20.0).ceil() as u64);
    }

    #[tokio::test]
    async fn test_store_failure_denies() {
        let limiter = RateLimiter::new(
            Arc::new(FailingStore),
            rates("100/minute"),
            Duration::from_millis(250),
            Arc::new(ManualClock::new(0.0)),
        );
        let d = limiter.check(Scope::Settings, "a").await;
        assert!(!d.allowed);
        assert_eq!(d.retry_after, Some(1));
        assert_eq!(d.limit, 100);
    }

    #[tokio::test]
    async fn test_store_timeout_denies() {
        let limiter = RateLimiter::new(
            Arc::new(StalledStore),
            rates("100/minute"),
            Duration::from_millis(20),
            Arc::new(ManualClock::new(0.0)),
        );
        let d = limiter.check(Scope::Health, "a").await;
        assert!(!d.allowed);
    }

    #[tokio::test]
    async fn test_from_config_redis_requires_url() {
        let config = RateLimitConfig {
            enabled: true,
            backend: RateLimitBackend::Redis,
            redis_url: None,
            settings: Rate::parse("3/minute").unwrap(),
            audit: Rate::parse("3/minute").unwrap(),
            health: Rate::parse("3/minute").unwrap(),
            timeout_ms: 250,
        };
        assert!(matches!(
            RateLimiter::from_config(&config).await,
            Err(RateLimitError::Config(_))
        ));
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(Scope::Settings.as_str(), "settings");
        assert_eq!(Scope::Audit.as_str(), "audit");
        assert_eq!(Scope::Health.as_str(), "health");
    }
}
