use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::keyspace::Keyspace;
use super::pubsub::{deliver, MessageCallback, SubscriptionRegistry};
use super::{
    Command, CommandResult, KvStore, RangeLimit, ScanOptions, ScanPage, ScoreBound, SetOptions,
    Transaction, DEFAULT_SCAN_COUNT,
};
use crate::clock::now_millis;
use crate::error::{Result, StoreError};
use crate::glob::GlobPattern;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// In-process, volatile implementation of [`KvStore`].
///
/// One exclusive lock guards the whole keyspace; every operation is short and
/// never awaits while holding it. A background task started by `connect`
/// drops expired keys, but reads check expiry themselves as well.
pub struct MemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
    subscriptions: Arc<RwLock<SubscriptionRegistry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweep_interval: Duration,
    connected: AtomicBool,
}

impl MemoryStore {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            keyspace: Arc::new(Mutex::new(Keyspace::new())),
            subscriptions: Arc::new(RwLock::new(SubscriptionRegistry::new())),
            sweeper: Mutex::new(None),
            sweep_interval,
            connected: AtomicBool::new(false),
        }
    }

    fn with_keyspace<T>(&self, op: impl FnOnce(&mut Keyspace, u64) -> T) -> Result<T> {
        let mut keyspace = self.keyspace.lock().map_err(|_| {
            StoreError::Internal("Failed to acquire keyspace lock".into())
        })?;
        Ok(op(&mut keyspace, now_millis()))
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let keyspace: Weak<Mutex<Keyspace>> = Arc::downgrade(&self.keyspace);
        let interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(keyspace) = keyspace.upgrade() else {
                    break;
                };
                let removed = match keyspace.lock() {
                    Ok(mut guard) => guard.sweep(now_millis()),
                    Err(_) => break,
                };
                if removed > 0 {
                    debug!(removed, "Expiry sweep removed keys");
                }
            }
        })
    }

    fn registry_read(&self) -> Result<std::sync::RwLockReadGuard<'_, SubscriptionRegistry>> {
        self.subscriptions.read().map_err(|_| {
            StoreError::Internal("Failed to acquire read lock on subscriptions".into())
        })
    }

    fn registry_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SubscriptionRegistry>> {
        self.subscriptions.write().map_err(|_| {
            StoreError::Internal("Failed to acquire write lock on subscriptions".into())
        })
    }

    fn stop_sweeper(&self) -> Result<()> {
        let mut sweeper = self.sweeper.lock().map_err(|_| {
            StoreError::Internal("Failed to acquire sweeper lock".into())
        })?;
        if let Some(handle) = sweeper.take() {
            handle.abort();
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn connect(&self) -> Result<()> {
        let mut sweeper = self.sweeper.lock().map_err(|_| {
            StoreError::Internal("Failed to acquire sweeper lock".into())
        })?;
        if sweeper.is_none() {
            *sweeper = Some(self.spawn_sweeper());
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(sweep_interval_ms = self.sweep_interval.as_millis() as u64, "Memory store connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_sweeper()?;
        self.with_keyspace(|ks, _| ks.clear())?;
        self.registry_write()?.clear();
        self.connected.store(false, Ordering::SeqCst);
        info!("Memory store disconnected, all data cleared");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_keyspace(|ks, now| ks.get(key, now))
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool> {
        self.with_keyspace(|ks, now| ks.set(key, value, options, now))?
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.del(keys, now))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_keyspace(|ks, now| ks.exists(key, now))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.with_keyspace(|ks, now| ks.incr_by(key, delta, now))?
    }

    async fn pexpire(&self, key: &str, millis: i64) -> Result<bool> {
        self.with_keyspace(|ks, now| ks.pexpire(key, millis, now))
    }

    async fn pttl(&self, key: &str) -> Result<i64> {
        self.with_keyspace(|ks, now| ks.pttl(key, now))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_keyspace(|ks, now| ks.hget(key, field, now))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.with_keyspace(|ks, now| ks.hset(key, field, value, now))
    }

    async fn hmset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        self.with_keyspace(|ks, now| ks.hmset(key, fields, now))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_keyspace(|ks, now| ks.hgetall(key, now))
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.hdel(key, fields, now))
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.with_keyspace(|ks, now| ks.hexists(key, field, now))
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        self.with_keyspace(|ks, now| ks.hkeys(key, now))
    }

    async fn hlen(&self, key: &str) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.hlen(key, now))
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.sadd(key, members, now))
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.srem(key, members, now))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.with_keyspace(|ks, now| ks.smembers(key, now))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with_keyspace(|ks, now| ks.sismember(key, member, now))
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.scard(key, now))
    }

    async fn lpush(&self, key: &str, values: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.lpush(key, values, now))
    }

    async fn rpush(&self, key: &str, values: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.rpush(key, values, now))
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.with_keyspace(|ks, now| ks.lpop(key, now))
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.with_keyspace(|ks, now| ks.rpop(key, now))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.with_keyspace(|ks, now| ks.lrange(key, start, stop, now))
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.llen(key, now))
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.with_keyspace(|ks, now| ks.ltrim(key, start, stop, now))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.zadd(key, score, member, now))
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.zrem(key, members, now))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.with_keyspace(|ks, now| ks.zscore(key, member, now))
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.with_keyspace(|ks, now| ks.zrange(key, start, stop, now))
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<RangeLimit>,
    ) -> Result<Vec<String>> {
        self.with_keyspace(|ks, now| ks.zrangebyscore(key, min, max, limit, now))
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.zremrangebyscore(key, min, max, now))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.with_keyspace(|ks, now| ks.zcard(key, now))
    }

    async fn zincrby(&self, key: &str, increment: f64, member: &str) -> Result<f64> {
        self.with_keyspace(|ks, now| ks.zincrby(key, increment, member, now))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = GlobPattern::new(pattern)?;
        self.with_keyspace(|ks, now| ks.keys(&pattern, now))
    }

    /// The cursor is an offset into a fresh sorted snapshot of matching keys.
    async fn scan(&self, cursor: &str, options: ScanOptions) -> Result<ScanPage> {
        let offset: usize = cursor
            .parse()
            .map_err(|_| StoreError::InvalidArgument(format!("invalid cursor '{}'", cursor)))?;
        let pattern = GlobPattern::new(options.pattern.as_deref().unwrap_or("*"))?;
        let count = options.count.unwrap_or(DEFAULT_SCAN_COUNT).max(1);

        let snapshot = self.with_keyspace(|ks, now| ks.keys(&pattern, now))?;
        let end = offset.saturating_add(count).min(snapshot.len());
        let keys = snapshot
            .get(offset..end)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let cursor = if end >= snapshot.len() {
            "0".to_string()
        } else {
            end.to_string()
        };

        Ok(ScanPage { cursor, keys })
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let callbacks = self.registry_read()?.matching_callbacks(channel);
        Ok(deliver(&callbacks, channel, message))
    }

    async fn subscribe(&self, channel: &str, callback: MessageCallback) -> Result<()> {
        self.registry_write()?.add_channel(channel, callback);
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str, callback: MessageCallback) -> Result<()> {
        self.registry_write()?.add_pattern(pattern, callback)?;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.registry_write()?.remove_channel(channel);
        Ok(())
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<()> {
        self.registry_write()?.remove_pattern(pattern);
        Ok(())
    }

    /// Runs the whole batch under one lock acquisition, so no other caller
    /// observes a partial result. A failing command yields its error and the
    /// commands before it stay applied.
    async fn exec_batch(&self, commands: Vec<Command>) -> Result<Vec<CommandResult>> {
        self.with_keyspace(|ks, now| {
            commands
                .iter()
                .map(|command| ks.apply(command, now))
                .collect::<Result<Vec<_>>>()
        })?
    }

    fn multi(&self) -> Transaction<'_> {
        Transaction::new(self)
    }
}
