//! In-process bucket store backed by dashmap

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::backend::BucketStore;
use super::bucket::{BucketOutcome, TokenBucket};
use super::error::RateLimitError;
use super::rate::Rate;
use crate::core::constants::RATE_LIMIT_CLEANUP_INTERVAL;

struct BucketEntry {
    bucket: TokenBucket,
    /// After this instant the bucket has refilled completely and can be dropped
    expires_at: f64,
}

/// Buckets held in this process only. Limits are per instance.
pub struct InMemoryBucketStore {
    buckets: DashMap<String, BucketEntry>,
    /// Counts `take` calls to schedule expiry sweeps
    cleanup_ops: AtomicU64,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            cleanup_ops: AtomicU64::new(0),
        }
    }

    fn cleanup_expired(&self, now: f64) {
        self.buckets.retain(|_, entry| now < entry.expires_at);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for InMemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn take(
        &self,
        key: &str,
        rate: &Rate,
        now: f64,
    ) -> Result<BucketOutcome, RateLimitError> {
        let idle_expiry = rate.period.as_secs_f64() * 2.0;

        // Entry API holds the shard lock across refill and decrement
        let outcome = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let outcome = entry.bucket.take(rate, now);
                entry.expires_at = entry.bucket.last_refill + idle_expiry;
                outcome
            }
            Entry::Vacant(vacant) => {
                let mut bucket = TokenBucket::full(rate, now);
                let outcome = bucket.take(rate, now);
                vacant.insert(BucketEntry {
                    bucket,
                    expires_at: now + idle_expiry,
                });
                outcome
            }
        };

        let ops = self.cleanup_ops.fetch_add(1, Ordering::Relaxed);
        if ops.is_multiple_of(RATE_LIMIT_CLEANUP_INTERVAL) {
            self.cleanup_expired(now);
        }

        Ok(outcome)
    }

    async fn health_check(&self) -> Result<(), RateLimitError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn rate(capacity: u32) -> Rate {
        Rate::new(capacity, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_take_until_empty() {
        let store = InMemoryBucketStore::new();
        let rate = rate(2);

        assert!(store.take("k", &rate, 0.0).await.unwrap().allowed);
        assert!(store.take("k", &rate, 0.0).await.unwrap().allowed);
        assert!(!store.take("k", &rate, 0.0).await.unwrap().allowed);

        // Another key has its own bucket
        assert!(store.take("other", &rate, 0.0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let store = InMemoryBucketStore::new();
        let rate = rate(1);

        assert!(store.take("k", &rate, 0.0).await.unwrap().allowed);
        assert!(!store.take("k", &rate, 30.0).await.unwrap().allowed);
        assert!(store.take("k", &rate, 60.0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_concurrent_takes_never_exceed_capacity() {
        let store = Arc::new(InMemoryBucketStore::new());
        let rate = rate(10);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.take("shared", &rate, 5.0).await.unwrap().allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn test_idle_buckets_are_swept() {
        let store = InMemoryBucketStore::new();
        let rate = rate(5);

        // First call runs a sweep (ops == 0) before anything is stale
        store.take("idle", &rate, 0.0).await.unwrap();
        assert_eq!(store.len(), 1);

        // Drive the op counter to the next sweep well after the idle bucket expired
        for i in 1..RATE_LIMIT_CLEANUP_INTERVAL {
            store.take(&format!("fresh-{i}"), &rate, 1_000.0).await.unwrap();
        }
        store.take("trigger", &rate, 1_000.0).await.unwrap();

        assert!(store.buckets.get("idle").is_none());
        assert!(store.buckets.get("trigger").is_some());
    }

    #[tokio::test]
    async fn test_swept_bucket_comes_back_full() {
        let store = InMemoryBucketStore::new();
        let rate = rate(3);

        for _ in 0..3 {
            store.take("k", &rate, 0.0).await.unwrap();
        }
        store.cleanup_expired(500.0);
        let outcome = store.take("k", &rate, 500.0).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 2);
    }
}
