use std::sync::Arc;

use tracing::{debug, warn};

use crate::algorithms::{
    FixedWindowLimiter, RateLimitAlgorithm, RateLimitDecision, SlidingWindowLimiter,
};
use crate::clock::now_millis;
use crate::error::{Result, StoreError};
use crate::rate_limit_config::{Algorithm, RateLimitConfig};
use crate::store::KvStore;

/// Rate limiting front door used by handlers and middleware.
///
/// Store failures never block traffic: the request is allowed and a warning
/// is logged.
#[derive(Clone)]
pub struct RateLimiter {
    algorithm: Arc<dyn RateLimitAlgorithm>,
}

impl RateLimiter {
    /// Build a limiter for `config`, sharing state through `store` when given
    pub fn new(config: RateLimitConfig, store: Option<Arc<dyn KvStore>>) -> Result<Self> {
        config.check()?;

        let algorithm: Arc<dyn RateLimitAlgorithm> = match (config.algorithm, store) {
            (Algorithm::Fixed, Some(store)) => Arc::new(FixedWindowLimiter::new(store, config)),
            (Algorithm::Fixed, None) => Arc::new(FixedWindowLimiter::local(config)),
            (Algorithm::Sliding, Some(store)) => Arc::new(SlidingWindowLimiter::new(store, config)),
            (Algorithm::Sliding, None) => Arc::new(SlidingWindowLimiter::local(config)),
        };

        Ok(Self { algorithm })
    }

    pub fn local(config: RateLimitConfig) -> Result<Self> {
        Self::new(config, None)
    }

    pub fn from_algorithm(algorithm: Arc<dyn RateLimitAlgorithm>) -> Self {
        Self { algorithm }
    }

    pub fn config(&self) -> &RateLimitConfig {
        self.algorithm.config()
    }

    pub fn is_distributed(&self) -> bool {
        self.algorithm.is_distributed()
    }

    /// Check rate limit for `key` at the current time
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, now_millis()).await
    }

    pub async fn check_at(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        match self.algorithm.check_at(key, now_ms).await {
            Ok(decision) => {
                debug!(
                    key = %key,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit checked"
                );
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit backend failed, allowing request");
                self.fail_open(now_ms)
            }
        }
    }

    /// Like [`check`](Self::check) but turns a denial into
    /// [`StoreError::RateLimitExceeded`]
    pub async fn enforce(&self, key: &str) -> Result<RateLimitDecision> {
        let decision = self.check(key).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(StoreError::RateLimitExceeded {
                limit: decision.limit,
                retry_after_ms: decision.retry_after_ms.unwrap_or(0),
                reset_at_ms: decision.reset_at_ms,
            })
        }
    }

    /// Forget everything recorded for `key`
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.algorithm.reset(key).await
    }

    /// Drop process-local state for keys idle longer than a window
    pub fn prune_expired(&self) -> usize {
        let pruned = self.algorithm.prune_expired(now_millis());
        if pruned > 0 {
            debug!(pruned, "Pruned idle rate limit keys");
        }
        pruned
    }

    fn fail_open(&self, now_ms: u64) -> RateLimitDecision {
        let config = self.algorithm.config();
        RateLimitDecision::allowed(config.max_requests, 0, now_ms + config.window_ms)
    }
}
