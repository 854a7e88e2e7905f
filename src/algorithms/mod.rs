//! Rate limiting algorithms module
//!
//! Each algorithm keeps its state in a shared [`KvStore`](crate::store::KvStore)
//! when one is configured, and in process memory otherwise. Both paths make
//! the same decisions for the same sequence of requests.

pub mod fixed_window;
pub mod sliding_window;

use async_trait::async_trait;
use serde::Serialize;

use crate::clock::now_millis;
use crate::error::Result;
use crate::rate_limit_config::RateLimitConfig;

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Requests counted in the current window, including this one when allowed
    pub count: u64,
    pub reset_at_ms: u64,
    pub retry_after_ms: Option<u64>,
}

impl RateLimitDecision {
    pub fn allowed(limit: u64, count: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(count),
            count,
            reset_at_ms,
            retry_after_ms: None,
        }
    }

    pub fn denied(limit: u64, count: u64, reset_at_ms: u64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            count,
            reset_at_ms,
            retry_after_ms: Some(retry_after_ms.max(1)),
        }
    }

    /// `Retry-After` value: whole seconds, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_ms.map(|ms| ms.div_ceil(1000))
    }

    /// Reset instant in epoch seconds, rounded up
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// Trait for rate limiting algorithms
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync {
    /// Records a request for `key` at `now_ms` and decides whether to admit it
    async fn check_at(&self, key: &str, now_ms: u64) -> Result<RateLimitDecision>;

    async fn check(&self, key: &str) -> Result<RateLimitDecision> {
        self.check_at(key, now_millis()).await
    }

    /// Forgets all state for `key`
    async fn reset(&self, key: &str) -> Result<()>;

    fn config(&self) -> &RateLimitConfig;

    fn is_distributed(&self) -> bool;

    /// Drops process-local state that can no longer affect a decision at
    /// `now_ms`, returning the number of keys dropped. State kept in a store
    /// carries its own expiry.
    fn prune_expired(&self, _now_ms: u64) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_rounding() {
        let decision = RateLimitDecision::denied(5, 5, 61_001, 1_001);
        assert_eq!(decision.retry_after_secs(), Some(2));
        assert_eq!(decision.reset_epoch_secs(), 62);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_allowed_remaining_floors_at_zero() {
        let decision = RateLimitDecision::allowed(5, 7, 0);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs().is_none());
    }
}
