//! Token-bucket arithmetic
//!
//! Kept free of clocks and storage so every backend (and every test) gets the
//! same answer for the same `(tokens, last_refill, now)`.

use super::rate::Rate;

/// Bucket state: fractional token count and the time (unix seconds) it was last refilled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_refill: f64,
}

/// Result of taking one token
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    pub allowed: bool,
    /// Whole tokens left after this request
    pub remaining: u32,
    /// Seconds until the bucket is full again (allowed) or holds one token (denied)
    pub reset_after: f64,
}

impl TokenBucket {
    /// A bucket that has never been used starts full
    pub fn full(rate: &Rate, now: f64) -> Self {
        Self {
            tokens: f64::from(rate.capacity),
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last call, then try to take one token.
    ///
    /// A clock that moves backwards neither refills nor rewinds `last_refill`.
    /// Denied requests do not consume anything.
    pub fn take(&mut self, rate: &Rate, now: f64) -> BucketOutcome {
        let capacity = f64::from(rate.capacity);
        let period = rate.period.as_secs_f64();
        let elapsed = (now - self.last_refill).max(0.0);

        self.tokens = (self.tokens + elapsed * capacity / period).clamp(0.0, capacity);
        self.last_refill = self.last_refill.max(now);

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }

        BucketOutcome::from_tokens(allowed, self.tokens, rate)
    }
}

impl BucketOutcome {
    /// Derive the caller-facing numbers from the post-decision token count
    pub fn from_tokens(allowed: bool, tokens: f64, rate: &Rate) -> Self {
        let capacity = f64::from(rate.capacity);
        let period = rate.period.as_secs_f64();
        let tokens = tokens.clamp(0.0, capacity);

        let missing = if allowed { capacity - tokens } else { 1.0 - tokens };
        let reset_after = missing * period / capacity;

        Self {
            allowed,
            remaining: tokens.floor() as u32,
            reset_after: reset_after.max(0.0),
        }
    }
}
