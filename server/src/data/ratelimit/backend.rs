//! Bucket store trait

use async_trait::async_trait;

use super::bucket::BucketOutcome;
use super::error::RateLimitError;
use super::rate::Rate;

/// Storage for token buckets.
///
/// `take` must refill, decide and persist as one atomic step per key so that
/// concurrent requests for the same client never both spend the last token.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Take one token from the bucket at `key`, creating it full if absent
    async fn take(&self, key: &str, rate: &Rate, now: f64)
    -> Result<BucketOutcome, RateLimitError>;

    /// Check backend connectivity
    async fn health_check(&self) -> Result<(), RateLimitError>;

    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}
