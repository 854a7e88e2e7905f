//! Sliding window rate limiting algorithm
//!
//! Every admitted request is remembered by its timestamp. A request is allowed
//! when fewer than `max_requests` timestamps fall inside the trailing window.

use super::{RateLimitAlgorithm, RateLimitDecision};
use crate::error::{Result, StoreError};
use crate::rate_limit_config::RateLimitConfig;
use crate::store::{CommandResult, KvStore, ScoreBound};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Sliding window rate limiter implementation
pub struct SlidingWindowLimiter {
    store: Option<Arc<dyn KvStore>>,
    config: RateLimitConfig,
    local: Mutex<HashMap<String, VecDeque<u64>>>,
    next_prune_ms: AtomicU64,
}

impl SlidingWindowLimiter {
    /// Create a limiter keeping request timestamps in a sorted set in `store`
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self {
            store: Some(store),
            config,
            local: Mutex::new(HashMap::new()),
            next_prune_ms: AtomicU64::new(0),
        }
    }

    /// Create a limiter that keeps timestamps in process memory
    pub fn local(config: RateLimitConfig) -> Self {
        Self {
            store: None,
            config,
            local: Mutex::new(HashMap::new()),
            next_prune_ms: AtomicU64::new(0),
        }
    }

    /// Generate the sorted set key for request timestamps
    fn timestamps_key(key: &str) -> String {
        format!("ratelimit:sliding:{}", key)
    }

    /// Members are `<timestamp>:<uuid>` so same-millisecond requests stay distinct
    fn member_timestamp(member: &str) -> Option<u64> {
        member.split(':').next()?.parse().ok()
    }

    /// Keys whose newest timestamp left the window hold nothing that counts
    fn retain_live(timestamps: &mut HashMap<String, VecDeque<u64>>, window_start: u64) -> usize {
        let before = timestamps.len();
        timestamps.retain(|_, entries| entries.back().is_some_and(|&ts| ts >= window_start));
        before - timestamps.len()
    }

    fn decide(&self, count: u64, oldest_ms: u64, now_ms: u64) -> RateLimitDecision {
        let limit = self.config.max_requests;
        let reset_at_ms = oldest_ms + self.config.window_ms;
        if count > limit {
            RateLimitDecision::denied(limit, limit, reset_at_ms, reset_at_ms.saturating_sub(now_ms))
        } else {
            RateLimitDecision::allowed(limit, count, reset_at_ms)
        }
    }

    async fn check_distributed(
        &self,
        store: &dyn KvStore,
        key: &str,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let timestamps_key = Self::timestamps_key(key);
        let window_start = now_ms.saturating_sub(self.config.window_ms);
        let member = format!("{}:{}", now_ms, Uuid::new_v4());

        let mut tx = store.multi();
        tx.zremrangebyscore(
            &timestamps_key,
            ScoreBound::NegInf,
            ScoreBound::Exclusive(window_start as f64),
        )
        .zadd(&timestamps_key, now_ms as f64, &member)
        .zcard(&timestamps_key)
        .zrange(&timestamps_key, 0, 0)
        .pexpire(&timestamps_key, self.config.window_ms as i64);
        let results = tx.exec().await?;

        let count = results
            .get(2)
            .and_then(CommandResult::as_int)
            .ok_or_else(|| StoreError::Internal("missing ZCARD reply in sliding window batch".into()))?
            .max(0) as u64;
        let oldest_ms = results
            .get(3)
            .and_then(CommandResult::as_list)
            .and_then(|members| members.first())
            .and_then(|m| Self::member_timestamp(m))
            .unwrap_or(now_ms);

        let decision = self.decide(count, oldest_ms, now_ms);
        if !decision.allowed {
            // Denied attempts must not keep the window full.
            store.zrem(&timestamps_key, &[&member]).await?;
        }
        debug!(key = %key, count, allowed = decision.allowed, "Sliding window checked");
        Ok(decision)
    }

    fn check_local(&self, key: &str, now_ms: u64) -> Result<RateLimitDecision> {
        let mut timestamps = self
            .local
            .lock()
            .map_err(|_| StoreError::Internal("Failed to acquire lock on timestamps".to_string()))?;

        let window_start = now_ms.saturating_sub(self.config.window_ms);
        if now_ms >= self.next_prune_ms.load(Ordering::Relaxed) {
            let pruned = Self::retain_live(&mut timestamps, window_start);
            self.next_prune_ms
                .store(now_ms + self.config.window_ms, Ordering::Relaxed);
            if pruned > 0 {
                debug!(pruned, "Pruned idle sliding window keys");
            }
        }

        let entries = timestamps.entry(key.to_string()).or_default();
        while entries.front().is_some_and(|&ts| ts < window_start) {
            entries.pop_front();
        }
        entries.push_back(now_ms);

        let count = entries.len() as u64;
        let oldest_ms = entries.front().copied().unwrap_or(now_ms);
        let decision = self.decide(count, oldest_ms, now_ms);
        if !decision.allowed {
            entries.pop_back();
        }
        Ok(decision)
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindowLimiter {
    async fn check_at(&self, key: &str, now_ms: u64) -> Result<RateLimitDecision> {
        match &self.store {
            Some(store) => self.check_distributed(store.as_ref(), key, now_ms).await,
            None => self.check_local(key, now_ms),
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        match &self.store {
            Some(store) => {
                store.del(&[&Self::timestamps_key(key)]).await?;
            }
            None => {
                let mut timestamps = self.local.lock().map_err(|_| {
                    StoreError::Internal("Failed to acquire lock on timestamps".to_string())
                })?;
                timestamps.remove(key);
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

    fn prune_expired(&self, now_ms: u64) -> usize {
        let window_start = now_ms.saturating_sub(self.config.window_ms);
        match self.local.lock() {
            Ok(mut timestamps) => Self::retain_live(&mut timestamps, window_start),
            Err(_) => 0,
        }
    }
}
