//! Rate limiter error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit configuration error: {0}")]
    Config(String),

    #[error("Rate limit store connection error: {0}")]
    Connection(String),

    #[error("Rate limit store returned an unexpected reply: {0}")]
    Operation(String),

    #[error("Rate limit store did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}
