//! Fixed window rate limiting algorithm
//!
//! A counter per key that starts with the first request and resets once its
//! window has elapsed. A client can get up to twice `max_requests` through
//! around a window boundary; that burst is inherent to fixed windows.

use super::{RateLimitAlgorithm, RateLimitDecision};
use crate::error::{Result, StoreError};
use crate::rate_limit_config::RateLimitConfig;
use crate::store::{CommandResult, KvStore, SetOptions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    reset_at_ms: u64,
}

/// Fixed window rate limiter implementation
pub struct FixedWindowLimiter {
    store: Option<Arc<dyn KvStore>>,
    config: RateLimitConfig,
    local: Mutex<HashMap<String, Window>>,
    next_prune_ms: AtomicU64,
}

impl FixedWindowLimiter {
    /// Create a limiter keeping its counters in `store`
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self {
            store: Some(store),
            config,
            local: Mutex::new(HashMap::new()),
            next_prune_ms: AtomicU64::new(0),
        }
    }

    /// Create a limiter that only counts requests seen by this process
    pub fn local(config: RateLimitConfig) -> Self {
        Self {
            store: None,
            config,
            local: Mutex::new(HashMap::new()),
            next_prune_ms: AtomicU64::new(0),
        }
    }

    fn counter_key(key: &str) -> String {
        format!("ratelimit:fixed:{}", key)
    }

    fn decide(&self, count: u64, reset_at_ms: u64, now_ms: u64) -> RateLimitDecision {
        let limit = self.config.max_requests;
        if count <= limit {
            RateLimitDecision::allowed(limit, count, reset_at_ms)
        } else {
            RateLimitDecision::denied(limit, count, reset_at_ms, reset_at_ms.saturating_sub(now_ms))
        }
    }

    async fn check_distributed(
        &self,
        store: &dyn KvStore,
        key: &str,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let counter = Self::counter_key(key);
        let window = self.config.window_ms;

        // Creating the counter with its expiry and incrementing it in one batch
        // keeps concurrent callers from losing increments.
        let mut tx = store.multi();
        tx.set(&counter, "0", SetOptions::px(window).nx())
            .incr(&counter)
            .pttl(&counter);
        let results = tx.exec().await?;

        let count = results
            .get(1)
            .and_then(CommandResult::as_int)
            .ok_or_else(|| StoreError::Internal("missing INCR reply in fixed window batch".into()))?;
        let pttl = results.get(2).and_then(CommandResult::as_int).unwrap_or(-1);

        let remaining_ms = if pttl > 0 { pttl as u64 } else { window };
        let count = count.max(0) as u64;
        debug!(key = %key, count, pttl, "Fixed window counter updated");

        Ok(self.decide(count, now_ms + remaining_ms, now_ms))
    }

    fn check_local(&self, key: &str, now_ms: u64) -> Result<RateLimitDecision> {
        let mut windows = self
            .local
            .lock()
            .map_err(|_| StoreError::Internal("Failed to acquire lock on windows".to_string()))?;

        if now_ms >= self.next_prune_ms.load(Ordering::Relaxed) {
            let pruned = Self::retain_open(&mut windows, now_ms);
            self.next_prune_ms
                .store(now_ms + self.config.window_ms, Ordering::Relaxed);
            if pruned > 0 {
                debug!(pruned, "Pruned elapsed fixed windows");
            }
        }

        let window = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if now_ms >= w.reset_at_ms {
                    w.count = 1;
                    w.reset_at_ms = now_ms + self.config.window_ms;
                } else {
                    w.count += 1;
                }
            })
            .or_insert(Window {
                count: 1,
                reset_at_ms: now_ms + self.config.window_ms,
            });

        let (count, reset_at_ms) = (window.count, window.reset_at_ms);
        Ok(self.decide(count, reset_at_ms, now_ms))
    }

    fn retain_open(windows: &mut HashMap<String, Window>, now_ms: u64) -> usize {
        let before = windows.len();
        windows.retain(|_, w| w.reset_at_ms > now_ms);
        before - windows.len()
    }
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindowLimiter {
    async fn check_at(&self, key: &str, now_ms: u64) -> Result<RateLimitDecision> {
        match &self.store {
            Some(store) => self.check_distributed(store.as_ref(), key, now_ms).await,
            None => self.check_local(key, now_ms),
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        match &self.store {
            Some(store) => {
                store.del(&[&Self::counter_key(key)]).await?;
            }
            None => {
                let mut windows = self.local.lock().map_err(|_| {
                    StoreError::Internal("Failed to acquire lock on windows".to_string())
                })?;
                windows.remove(key);
            }
        }
        Ok(())
    }

    fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn is_distributed(&self) -> bool {
        self.store.is_some()
    }

    /// Drop local windows that have already reset
    fn prune_expired(&self, now_ms: u64) -> usize {
        match self.local.lock() {
            Ok(mut windows) => Self::retain_open(&mut windows, now_ms),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::now_millis;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_counts_within_window() {
        let limiter = FixedWindowLimiter::local(RateLimitConfig::fixed(3, 1000));
        let t0 = 10_000;

        for expected in 1..=3 {
            let decision = limiter.check_at("client", t0 + expected).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
            assert_eq!(decision.reset_at_ms, t0 + 1 + 1000);
        }

        let denied = limiter.check_at("client", t0 + 500).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_ms, Some(501));
    }

    #[tokio::test]
    async fn test_local_reset_after_window() {
        let limiter = FixedWindowLimiter::local(RateLimitConfig::fixed(2, 1000));
        for _ in 0..3 {
            limiter.check_at("client", 0).await.unwrap();
        }

        let decision = limiter.check_at("client", 1000).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.reset_at_ms, 2000);
    }

    #[tokio::test]
    async fn test_local_keys_are_independent() {
        let limiter = FixedWindowLimiter::local(RateLimitConfig::fixed(1, 1000));
        assert!(limiter.check_at("a", 0).await.unwrap().allowed);
        assert!(limiter.check_at("b", 0).await.unwrap().allowed);
        assert!(!limiter.check_at("a", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_local_reset_and_prune() {
        let limiter = FixedWindowLimiter::local(RateLimitConfig::fixed(1, 1000));
        limiter.check_at("a", 0).await.unwrap();
        limiter.check_at("b", 500).await.unwrap();

        limiter.reset("a").await.unwrap();
        assert!(limiter.check_at("a", 10).await.unwrap().allowed);

        assert_eq!(limiter.prune_expired(1200), 1);
        assert!(!limiter.is_distributed());
    }

    #[tokio::test]
    async fn test_local_state_drops_elapsed_windows() {
        let limiter = FixedWindowLimiter::local(RateLimitConfig::fixed(3, 1000));
        for i in 0..10_000 {
            limiter.check_at(&format!("ip:{}", i), 0).await.unwrap();
        }
        assert_eq!(limiter.local.lock().unwrap().len(), 10_000);

        limiter.check_at("ip:late", 10_000_000).await.unwrap();
        assert_eq!(limiter.local.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_distributed_window_resets() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let limiter = FixedWindowLimiter::new(store.clone(), RateLimitConfig::fixed(3, 300));

        for expected in 1..=3 {
            let decision = limiter.check("client").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
        }
        let denied = limiter.check("client").await.unwrap();
        assert!(!denied.allowed);
        let retry = denied.retry_after_ms.unwrap();
        assert!(retry > 0 && retry <= 300);

        tokio::time::sleep(Duration::from_millis(350)).await;

        let decision = limiter.check("client").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert!(decision.reset_at_ms > now_millis());
    }

    #[tokio::test]
    async fn test_distributed_counter_has_expiry() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let limiter = FixedWindowLimiter::new(store.clone(), RateLimitConfig::fixed(3, 60_000));

        limiter.check("client").await.unwrap();
        let pttl = store.pttl("ratelimit:fixed:client").await.unwrap();
        assert!(pttl > 0 && pttl <= 60_000);

        limiter.reset("client").await.unwrap();
        assert!(!store.exists("ratelimit:fixed:client").await.unwrap());
    }

    #[tokio::test]
    async fn test_distributed_concurrent_requests_are_all_counted() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let limiter = Arc::new(FixedWindowLimiter::new(
            store.clone(),
            RateLimitConfig::fixed(100, 60_000),
        ));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.check("shared").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().allowed);
        }

        assert_eq!(
            store.get("ratelimit:fixed:shared").await.unwrap(),
            Some("20".to_string())
        );
    }
}
