//! Key-value store contract and its two backends.
//!
//! [`MemoryStore`] keeps everything in process and is volatile. [`RedisStore`]
//! fronts a remote Redis server. Both implement [`KvStore`] and are meant to be
//! interchangeable: build one at startup with [`create_store`] and pass the
//! `Arc<dyn KvStore>` to whatever needs it.

pub mod entry;
pub mod keyspace;
pub mod memory;
pub mod pubsub;
pub mod redis;
pub mod transaction;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, StoreError};

pub use memory::MemoryStore;
pub use pubsub::MessageCallback;
pub use redis::RedisStore;
pub use transaction::{Command, CommandResult, Transaction};

/// Options for [`KvStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetOptions {
    /// Expire after this many seconds.
    pub ex: Option<u64>,
    /// Expire after this many milliseconds.
    pub px: Option<u64>,
    /// Only write if the key does not exist.
    pub nx: bool,
    /// Only write if the key already exists.
    pub xx: bool,
}

impl SetOptions {
    pub fn ex(seconds: u64) -> Self {
        Self {
            ex: Some(seconds),
            ..Self::default()
        }
    }

    pub fn px(millis: u64) -> Self {
        Self {
            px: Some(millis),
            ..Self::default()
        }
    }

    pub fn nx(mut self) -> Self {
        self.nx = true;
        self
    }

    pub fn xx(mut self) -> Self {
        self.xx = true;
        self
    }

    /// Relative expiry in milliseconds, rejecting contradictory options.
    pub fn ttl_millis(&self) -> Result<Option<u64>> {
        if self.nx && self.xx {
            return Err(StoreError::InvalidArgument(
                "nx and xx are mutually exclusive".to_string(),
            ));
        }
        match (self.ex, self.px) {
            (Some(_), Some(_)) => Err(StoreError::InvalidArgument(
                "ex and px are mutually exclusive".to_string(),
            )),
            (Some(0), None) | (None, Some(0)) => Err(StoreError::InvalidArgument(
                "expire time must be positive".to_string(),
            )),
            (Some(secs), None) => Ok(Some(secs.saturating_mul(1000))),
            (None, Some(millis)) => Ok(Some(millis)),
            (None, None) => Ok(None),
        }
    }
}

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// Parses `-inf`, `+inf`, `inf`, `(1.5` or a plain number.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "-inf" => return Ok(ScoreBound::NegInf),
            "+inf" | "inf" => return Ok(ScoreBound::PosInf),
            _ => {}
        }
        let (exclusive, number) = match raw.strip_prefix('(') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let score: f64 = number.parse().map_err(|_| {
            StoreError::InvalidArgument(format!("min or max is not a float: '{}'", raw))
        })?;
        Ok(if exclusive {
            ScoreBound::Exclusive(score)
        } else {
            ScoreBound::Inclusive(score)
        })
    }

    pub fn admits_as_min(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
        }
    }

    pub fn admits_as_max(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreBound::NegInf => write!(f, "-inf"),
            ScoreBound::PosInf => write!(f, "+inf"),
            ScoreBound::Inclusive(score) => write!(f, "{}", score),
            ScoreBound::Exclusive(score) => write!(f, "({}", score),
        }
    }
}

impl From<f64> for ScoreBound {
    fn from(score: f64) -> Self {
        ScoreBound::Inclusive(score)
    }
}

/// `LIMIT offset count` for [`KvStore::zrangebyscore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeLimit {
    pub offset: usize,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub pattern: Option<String>,
    pub count: Option<usize>,
}

impl ScanOptions {
    pub fn matching(pattern: &str) -> Self {
        Self {
            pattern: Some(pattern.to_string()),
            count: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// One page of a [`KvStore::scan`]. A `cursor` of `"0"` means the scan is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: String,
    pub keys: Vec<String>,
}

impl ScanPage {
    pub fn is_finished(&self) -> bool {
        self.cursor == "0"
    }
}

pub const DEFAULT_SCAN_COUNT: usize = 10;

/// The store contract shared by every backend.
///
/// Reads of a key holding a different kind of value behave as if the key
/// were missing. Missing keys never produce errors.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Releases all resources. The embedded backend also drops all data.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn backend_name(&self) -> &'static str;

    // Strings and keys

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns false when an `nx`/`xx` precondition prevented the write.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool>;

    async fn del(&self, keys: &[&str]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn decr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, -1).await
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        self.pexpire(key, seconds.saturating_mul(1000)).await
    }

    async fn pexpire(&self, key: &str, millis: i64) -> Result<bool>;

    /// `-2` for a missing key, `-1` without expiry, else seconds left rounded up.
    async fn ttl(&self, key: &str) -> Result<i64> {
        let pttl = self.pttl(key).await?;
        Ok(if pttl < 0 { pttl } else { (pttl + 999) / 1000 })
    }

    async fn pttl(&self, key: &str) -> Result<i64>;

    // Hashes

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Returns true when the field was newly created.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    async fn hmset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64>;

    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;

    async fn hkeys(&self, key: &str) -> Result<Vec<String>>;

    async fn hlen(&self, key: &str) -> Result<u64>;

    // Sets

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64>;

    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn scard(&self, key: &str) -> Result<u64>;

    // Lists

    /// The last value pushed ends up at index 0.
    async fn lpush(&self, key: &str, values: &[&str]) -> Result<u64>;

    async fn rpush(&self, key: &str, values: &[&str]) -> Result<u64>;

    async fn lpop(&self, key: &str) -> Result<Option<String>>;

    async fn rpop(&self, key: &str) -> Result<Option<String>>;

    /// Negative indices count from the end; `stop` is inclusive.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    async fn llen(&self, key: &str) -> Result<u64>;

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    // Sorted sets

    /// Returns 1 if the member was added, 0 if only its score changed.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64>;

    async fn zrem(&self, key: &str, members: &[&str]) -> Result<u64>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    async fn zrangebyscore(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<RangeLimit>,
    ) -> Result<Vec<String>>;

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    async fn zincrby(&self, key: &str, increment: f64, member: &str) -> Result<f64>;

    // Scanning

    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn scan(&self, cursor: &str, options: ScanOptions) -> Result<ScanPage>;

    // Pub/sub

    /// Returns how many subscribers received the message. The embedded
    /// backend counts every callback it invoked. The Redis backend returns
    /// the server's receiver count, where each subscribed connection counts
    /// once no matter how many callbacks it serves.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64>;

    async fn subscribe(&self, channel: &str, callback: MessageCallback) -> Result<()>;

    async fn psubscribe(&self, pattern: &str, callback: MessageCallback) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    async fn punsubscribe(&self, pattern: &str) -> Result<()>;

    // Transactions and scripting

    /// Runs queued commands in order, one result per command. Atomicity is
    /// backend specific: ordered always, all-or-nothing not guaranteed.
    async fn exec_batch(&self, commands: Vec<Command>) -> Result<Vec<CommandResult>>;

    async fn eval(&self, _script: &str, _keys: &[&str], _args: &[&str]) -> Result<CommandResult> {
        Err(StoreError::UnsupportedOperation(format!(
            "eval is not supported by the {} backend",
            self.backend_name()
        )))
    }

    /// Starts a batch on this store. Callable on concrete stores and on
    /// `dyn KvStore` alike.
    fn multi(&self) -> Transaction<'_>;
}

/// Builds the backend selected by `config`. Fails with a configuration error
/// when the networked backend is requested without connection details.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(config.sweep_interval()))),
        StoreBackend::Redis => {
            let options = config.redis_options()?;
            Ok(Arc::new(RedisStore::new(options)?))
        }
    }
}

/// Resolves `start..=stop` (negative values count from the end) against a
/// collection of `len` items.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(0, -1, 4), Some((0, 3)));
        assert_eq!(normalize_range(-2, -1, 4), Some((2, 3)));
        assert_eq!(normalize_range(1, 100, 4), Some((1, 3)));
        assert_eq!(normalize_range(-100, 1, 4), Some((0, 1)));
        assert_eq!(normalize_range(3, 1, 4), None);
        assert_eq!(normalize_range(5, 10, 4), None);
        assert_eq!(normalize_range(0, -1, 0), None);
        assert_eq!(normalize_range(0, -5, 4), None);
    }

    #[test]
    fn test_set_options_validation() {
        assert_eq!(SetOptions::default().ttl_millis().unwrap(), None);
        assert_eq!(SetOptions::ex(2).ttl_millis().unwrap(), Some(2000));
        assert_eq!(SetOptions::px(150).ttl_millis().unwrap(), Some(150));
        assert!(SetOptions::default().nx().xx().ttl_millis().is_err());
        assert!(SetOptions::ex(0).ttl_millis().is_err());
    }

    #[test]
    fn test_score_bound_parse() {
        assert_eq!(ScoreBound::parse("-inf").unwrap(), ScoreBound::NegInf);
        assert_eq!(ScoreBound::parse("+inf").unwrap(), ScoreBound::PosInf);
        assert_eq!(ScoreBound::parse("2.5").unwrap(), ScoreBound::Inclusive(2.5));
        assert_eq!(ScoreBound::parse("(3").unwrap(), ScoreBound::Exclusive(3.0));
        assert!(ScoreBound::parse("abc").is_err());
    }

    #[test]
    fn test_score_bound_admission() {
        assert!(ScoreBound::Exclusive(1.0).admits_as_max(0.5));
        assert!(!ScoreBound::Exclusive(1.0).admits_as_max(1.0));
        assert!(ScoreBound::Inclusive(1.0).admits_as_min(1.0));
        assert!(ScoreBound::NegInf.admits_as_min(f64::MIN));
        assert_eq!(ScoreBound::Exclusive(7.0).to_string(), "(7");
    }
}
