//! [`KvStore`] over a remote Redis server.
//!
//! Keys are namespaced with a configurable prefix on the way in and stripped
//! on the way out. Commands share one multiplexed connection. Pub/sub never
//! touches it: every subscribed channel or pattern gets its own subscriber
//! connection, opened on the first subscription and read through one stream
//! for as long as the subscription lives.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue, Msg, RedisResult};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::pubsub::{deliver, MessageCallback, SubscriptionRegistry};
use super::{
    Command, CommandResult, KvStore, RangeLimit, ScanOptions, ScanPage, ScoreBound, SetOptions,
    Transaction, DEFAULT_SCAN_COUNT,
};
use crate::error::{Result, StoreError};
use crate::glob::{escape_redis_glob, GlobPattern};

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_millis(2000);
const RETRY_STEP_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub url: String,
    pub key_prefix: String,
    pub max_retries: u32,
    pub max_retry_delay: Duration,
}

impl RedisOptions {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            key_prefix: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }
}

/// Backoff before reconnection attempt `attempt` (1-based): grows linearly and
/// is capped at `max_delay`.
pub fn retry_delay(attempt: u32, max_delay: Duration) -> Duration {
    Duration::from_millis(RETRY_STEP_MS.saturating_mul(u64::from(attempt))).min(max_delay)
}

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// A channel or pattern as registered by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Selector {
    Channel(String),
    Pattern { pattern: String, wire: String },
}

impl Selector {
    fn pattern(pattern: &str) -> Result<Self> {
        Ok(Selector::Pattern {
            pattern: pattern.to_string(),
            wire: GlobPattern::new(pattern)?.to_redis_glob(),
        })
    }

    fn name(&self) -> &str {
        match self {
            Selector::Channel(channel) => channel,
            Selector::Pattern { pattern, .. } => pattern,
        }
    }
}

pub struct RedisStore {
    client: Client,
    options: RedisOptions,
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    connected: AtomicBool,
    subscriptions: Arc<std::sync::RwLock<SubscriptionRegistry>>,
    listeners: Mutex<HashMap<Selector, JoinHandle<()>>>,
}

impl RedisStore {
    pub fn new(options: RedisOptions) -> Result<Self> {
        if options.url.trim().is_empty() {
            return Err(StoreError::Configuration(
                "Redis backend requires a connection URL".into(),
            ));
        }
        let client = Client::open(options.url.as_str()).map_err(|e| {
            StoreError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self {
            client,
            options,
            connection: Arc::new(RwLock::new(None)),
            connected: AtomicBool::new(false),
            subscriptions: Arc::new(std::sync::RwLock::new(SubscriptionRegistry::new())),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    pub fn key_prefix(&self) -> &str {
        &self.options.key_prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.options.key_prefix, key)
    }

    fn prefixed_all(&self, keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| self.prefixed(key)).collect()
    }

    fn strip_prefix(&self, key: String) -> String {
        match key.strip_prefix(self.options.key_prefix.as_str()) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    /// Redis glob selecting every key in this store's namespace.
    fn namespace_glob(&self) -> String {
        format!("{}*", escape_redis_glob(&self.options.key_prefix, true))
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.options.max_retries {
                        error!(attempts = attempt, error = %err, "Giving up on Redis {}", what);
                        return Err(StoreError::Connection(format!(
                            "Failed to open Redis {} after {} attempts: {}",
                            what, attempt, err
                        )));
                    }
                    let delay = retry_delay(attempt, self.options.max_retry_delay);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Redis {} failed, retrying",
                        what
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Connection("No Redis connection available".into()))
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn().await?;
        cmd.query_async::<_, T>(&mut conn)
            .await
            .map_err(StoreError::from)
    }

    /// Like [`Self::query`], but a key holding another kind of value reads as
    /// the empty default instead of failing.
    async fn query_or_default<T: FromRedisValue + Default>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn().await?;
        match cmd.query_async::<_, T>(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) if err.code() == Some("WRONGTYPE") => Ok(T::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn set_cmd(&self, key: &str, value: &str, options: SetOptions) -> Result<redis::Cmd> {
        let ttl_ms = options.ttl_millis()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key)).arg(value);
        if let Some(ttl_ms) = ttl_ms {
            cmd.arg("PX").arg(ttl_ms);
        }
        if options.nx {
            cmd.arg("NX");
        } else if options.xx {
            cmd.arg("XX");
        }
        Ok(cmd)
    }

    fn to_cmd(&self, command: &Command) -> Result<redis::Cmd> {
        let cmd = match command {
            Command::Get(key) => keyed("GET", self.prefixed(key)),
            Command::Set {
                key,
                value,
                options,
            } => return self.set_cmd(key, value, *options),
            Command::Del(keys) => {
                let mut cmd = redis::cmd("DEL");
                for key in keys {
                    cmd.arg(self.prefixed(key));
                }
                cmd
            }
            Command::Exists(key) => keyed("EXISTS", self.prefixed(key)),
            Command::IncrBy(key, delta) => {
                let mut cmd = keyed("INCRBY", self.prefixed(key));
                cmd.arg(*delta);
                cmd
            }
            Command::PExpire(key, millis) => {
                let mut cmd = keyed("PEXPIRE", self.prefixed(key));
                cmd.arg(*millis);
                cmd
            }
            Command::Ttl(key) => keyed("TTL", self.prefixed(key)),
            Command::PTtl(key) => keyed("PTTL", self.prefixed(key)),
            Command::HGet(key, field) => {
                let mut cmd = keyed("HGET", self.prefixed(key));
                cmd.arg(field);
                cmd
            }
            Command::HSet(key, field, value) => {
                let mut cmd = keyed("HSET", self.prefixed(key));
                cmd.arg(field).arg(value);
                cmd
            }
            Command::HDel(key, fields) => {
                let mut cmd = keyed("HDEL", self.prefixed(key));
                cmd.arg(fields);
                cmd
            }
            Command::HGetAll(key) => keyed("HGETALL", self.prefixed(key)),
            Command::SAdd(key, members) => {
                let mut cmd = keyed("SADD", self.prefixed(key));
                cmd.arg(members);
                cmd
            }
            Command::SRem(key, members) => {
                let mut cmd = keyed("SREM", self.prefixed(key));
                cmd.arg(members);
                cmd
            }
            Command::SIsMember(key, member) => {
                let mut cmd = keyed("SISMEMBER", self.prefixed(key));
                cmd.arg(member);
                cmd
            }
            Command::SMembers(key) => keyed("SMEMBERS", self.prefixed(key)),
            Command::LPush(key, values) => {
                let mut cmd = keyed("LPUSH", self.prefixed(key));
                cmd.arg(values);
                cmd
            }
            Command::RPush(key, values) => {
                let mut cmd = keyed("RPUSH", self.prefixed(key));
                cmd.arg(values);
                cmd
            }
            Command::LRange(key, start, stop) => {
                let mut cmd = keyed("LRANGE", self.prefixed(key));
                cmd.arg(*start).arg(*stop);
                cmd
            }
            Command::ZAdd(key, score, member) => {
                let mut cmd = keyed("ZADD", self.prefixed(key));
                cmd.arg(*score).arg(member);
                cmd
            }
            Command::ZRem(key, members) => {
                let mut cmd = keyed("ZREM", self.prefixed(key));
                cmd.arg(members);
                cmd
            }
            Command::ZScore(key, member) => {
                let mut cmd = keyed("ZSCORE", self.prefixed(key));
                cmd.arg(member);
                cmd
            }
            Command::ZCard(key) => keyed("ZCARD", self.prefixed(key)),
            Command::ZRange(key, start, stop) => {
                let mut cmd = keyed("ZRANGE", self.prefixed(key));
                cmd.arg(*start).arg(*stop);
                cmd
            }
            Command::ZRangeByScore(key, min, max) => {
                let mut cmd = keyed("ZRANGEBYSCORE", self.prefixed(key));
                cmd.arg(min.to_string()).arg(max.to_string());
                cmd
            }
            Command::ZRemRangeByScore(key, min, max) => {
                let mut cmd = keyed("ZREMRANGEBYSCORE", self.prefixed(key));
                cmd.arg(min.to_string()).arg(max.to_string());
                cmd
            }
            Command::ZIncrBy(key, increment, member) => {
                let mut cmd = keyed("ZINCRBY", self.prefixed(key));
                cmd.arg(*increment).arg(member);
                cmd
            }
        };
        Ok(cmd)
    }

    /// Registers `callback` for `selector`, opening its subscriber connection
    /// when this is the first callback. A failed open leaves nothing behind.
    async fn add_listener(&self, selector: Selector, callback: MessageCallback) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        let first = {
            let mut registry = self.registry_write()?;
            match &selector {
                Selector::Channel(channel) => registry.add_channel(channel, callback),
                Selector::Pattern { pattern, .. } => registry.add_pattern(pattern, callback)?,
            }
        };
        if !first {
            return Ok(());
        }

        let client = self.client.clone();
        let opened = self
            .with_retry("subscriber connection", || {
                let client = client.clone();
                let selector = selector.clone();
                async move { open_subscription(&client, &selector).await }
            })
            .await;

        match opened {
            Ok(messages) => {
                let task = tokio::spawn(run_listener(
                    self.client.clone(),
                    selector.clone(),
                    messages,
                    self.subscriptions.clone(),
                    self.options.max_retry_delay,
                ));
                info!(selector = selector.name(), "Redis subscription opened");
                listeners.insert(selector, task);
                Ok(())
            }
            Err(err) => {
                let mut registry = self.registry_write()?;
                match &selector {
                    Selector::Channel(channel) => registry.remove_channel(channel),
                    Selector::Pattern { pattern, .. } => registry.remove_pattern(pattern),
                };
                Err(err)
            }
        }
    }

    /// Closing the subscriber connection ends the subscription on the server.
    async fn remove_listener(&self, selector: &Selector) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        {
            let mut registry = self.registry_write()?;
            match selector {
                Selector::Channel(channel) => registry.remove_channel(channel),
                Selector::Pattern { pattern, .. } => registry.remove_pattern(pattern),
            };
        }
        if let Some(task) = listeners.remove(selector) {
            task.abort();
        }
        Ok(())
    }

    fn registry_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SubscriptionRegistry>> {
        self.subscriptions.write().map_err(|_| {
            StoreError::Internal("Failed to acquire write lock on subscriptions".into())
        })
    }
}

fn keyed(name: &str, key: String) -> redis::Cmd {
    let mut cmd = redis::cmd(name);
    cmd.arg(key);
    cmd
}

/// Opens a subscriber connection for `selector` and turns it into one
/// long-lived message stream.
async fn open_subscription(client: &Client, selector: &Selector) -> RedisResult<MessageStream> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    match selector {
        Selector::Channel(channel) => pubsub.subscribe(channel).await?,
        Selector::Pattern { wire, .. } => pubsub.psubscribe(wire).await?,
    }
    Ok(Box::pin(pubsub.into_on_message()))
}

/// Delivers every message of one subscription. When the server drops the
/// connection the subscription is opened again until the task is aborted.
async fn run_listener(
    client: Client,
    selector: Selector,
    mut messages: MessageStream,
    registry: Arc<std::sync::RwLock<SubscriptionRegistry>>,
    max_retry_delay: Duration,
) {
    loop {
        while let Some(msg) = messages.next().await {
            dispatch_message(&registry, &selector, &msg);
        }
        warn!(selector = selector.name(), "Redis subscriber connection closed");

        let mut attempt: u32 = 0;
        messages = loop {
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(retry_delay(attempt, max_retry_delay)).await;
            match open_subscription(&client, &selector).await {
                Ok(messages) => break messages,
                Err(err) => warn!(
                    attempt,
                    selector = selector.name(),
                    error = %err,
                    "Redis resubscribe failed, retrying"
                ),
            }
        };
        info!(selector = selector.name(), attempt, "Redis subscription restored");
    }
}

fn dispatch_message(
    registry: &std::sync::RwLock<SubscriptionRegistry>,
    selector: &Selector,
    msg: &Msg,
) {
    let channel = msg.get_channel_name();
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(channel, error = %err, "Dropping non-text pub/sub payload");
            return;
        }
    };

    let callbacks = match registry.read() {
        Ok(registry) => match selector {
            Selector::Channel(name) => registry.channel_callbacks(name),
            Selector::Pattern { pattern, .. } => registry.pattern_callbacks(pattern),
        },
        Err(_) => return,
    };
    deliver(&callbacks, channel, &payload);
}

/// Interprets one `EXEC` reply according to the command that produced it, so
/// results look the same as the embedded backend's.
pub(crate) fn decode_reply(command: &Command, value: &redis::Value) -> Result<CommandResult> {
    let result = match command {
        Command::Get(_) | Command::HGet(_, _) => {
            let text: Option<String> = redis::from_redis_value(value)?;
            text.map_or(CommandResult::Nil, CommandResult::Text)
        }
        Command::Set { .. } => match value {
            redis::Value::Nil => CommandResult::Nil,
            _ => CommandResult::Ok,
        },
        Command::Exists(_)
        | Command::PExpire(_, _)
        | Command::SIsMember(_, _)
        | Command::HSet(_, _, _) => {
            let n: i64 = redis::from_redis_value(value)?;
            CommandResult::Bool(n > 0)
        }
        Command::Del(_)
        | Command::IncrBy(_, _)
        | Command::Ttl(_)
        | Command::PTtl(_)
        | Command::HDel(_, _)
        | Command::SAdd(_, _)
        | Command::SRem(_, _)
        | Command::LPush(_, _)
        | Command::RPush(_, _)
        | Command::ZAdd(_, _, _)
        | Command::ZRem(_, _)
        | Command::ZCard(_)
        | Command::ZRemRangeByScore(_, _, _) => CommandResult::Int(redis::from_redis_value(value)?),
        Command::HGetAll(_) => CommandResult::Map(redis::from_redis_value(value)?),
        Command::SMembers(_) => {
            let mut members: Vec<String> = redis::from_redis_value(value)?;
            members.sort();
            CommandResult::List(members)
        }
        Command::LRange(_, _, _) | Command::ZRange(_, _, _) | Command::ZRangeByScore(_, _, _) => {
            CommandResult::List(redis::from_redis_value(value)?)
        }
        Command::ZScore(_, _) => {
            let score: Option<f64> = redis::from_redis_value(value)?;
            score.map_or(CommandResult::Nil, CommandResult::Float)
        }
        Command::ZIncrBy(_, _, _) => CommandResult::Float(redis::from_redis_value(value)?),
    };
    Ok(result)
}

/// Generic conversion used for script replies.
pub(crate) fn value_to_result(value: &redis::Value) -> CommandResult {
    match value {
        redis::Value::Nil => CommandResult::Nil,
        redis::Value::Int(n) => CommandResult::Int(*n),
        redis::Value::Data(bytes) => CommandResult::Text(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Bulk(items) => CommandResult::Array(items.iter().map(value_to_result).collect()),
        redis::Value::Status(status) => CommandResult::Text(status.clone()),
        redis::Value::Okay => CommandResult::Ok,
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn connect(&self) -> Result<()> {
        let client = self.client.clone();
        let conn = self
            .with_retry("connection", || {
                let client = client.clone();
                async move { client.get_multiplexed_tokio_connection().await }
            })
            .await?;

        *self.connection.write().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        info!(prefix = %self.options.key_prefix, "Connected to Redis");
        Ok(())
    }

    /// Closes the command connection and every subscriber connection. Data
    /// stays on the server.
    async fn disconnect(&self) -> Result<()> {
        self.connection.write().await.take();
        for (_, task) in self.listeners.lock().await.drain() {
            task.abort();
        }
        self.registry_write()?.clear();
        self.connected.store(false, Ordering::SeqCst);
        info!("Disconnected from Redis");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query_or_default(&keyed("GET", self.prefixed(key))).await
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool> {
        let cmd = self.set_cmd(key, value, options)?;
        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(self.prefixed_all(keys))).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.query(&keyed("EXISTS", self.prefixed(key))).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("INCRBY")
            .arg(self.prefixed(key))
            .arg(delta)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|err| match err.kind() {
                redis::ErrorKind::ResponseError => StoreError::NotAnInteger,
                _ => StoreError::from(err),
            })
    }

    async fn pexpire(&self, key: &str, millis: i64) -> Result<bool> {
        self.query(keyed("PEXPIRE", self.prefixed(key)).arg(millis)).await
    }

    async fn pttl(&self, key: &str) -> Result<i64> {
        self.query(&keyed("PTTL", self.prefixed(key))).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.query_or_default(keyed("HGET", self.prefixed(key)).arg(field)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let added: i64 = self
            .query(keyed("HSET", self.prefixed(key)).arg(field).arg(value))
            .await?;
        Ok(added > 0)
    }

    async fn hmset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = keyed("HSET", self.prefixed(key));
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.query_or_default(&keyed("HGETALL", self.prefixed(key))).await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.query_or_default(keyed("HDEL", self.prefixed(key)).arg(fields)).await
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.query_or_default(keyed("HEXISTS", self.prefixed(key)).arg(field)).await
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        self.query_or_default(&keyed("HKEYS", self.prefixed(key))).await
    }

    async fn hlen(&self, key: &str) -> Result<u64> {
        self.query_or_default(&keyed("HLEN", self.prefixed(key))).await
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(keyed("SADD", self.prefixed(key)).arg(members)).await
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query_or_default(keyed("SREM", self.prefixed(key)).arg(members)).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> = self
            .query_or_default(&keyed("SMEMBERS", self.prefixed(key)))
            .await?;
        members.sort();
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.query_or_default(keyed("SISMEMBER", self.prefixed(key)).arg(member)).await
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.query_or_default(&keyed("SCARD", self.prefixed(key))).await
    }

    async fn lpush(&self, key: &str, values: &[&str]) -> Result<u64> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        self.query(keyed("LPUSH", self.prefixed(key)).arg(values)).await
    }

    async fn rpush(&self, key: &str, values: &[&str]) -> Result<u64> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        self.query(keyed("RPUSH", self.prefixed(key)).arg(values)).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.query_or_default(&keyed("LPOP", self.prefixed(key))).await
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.query_or_default(&keyed("RPOP", self.prefixed(key))).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.query_or_default(keyed("LRANGE", self.prefixed(key)).arg(start).arg(stop))
            .await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.query_or_default(&keyed("LLEN", self.prefixed(key))).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let _: Option<String> = self
            .query_or_default(keyed("LTRIM", self.prefixed(key)).arg(start).arg(stop))
            .await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<u64> {
        self.query(keyed("ZADD", self.prefixed(key)).arg(score).arg(member))
            .await
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query_or_default(keyed("ZREM", self.prefixed(key)).arg(members)).await
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.query_or_default(keyed("ZSCORE", self.prefixed(key)).arg(member)).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.query_or_default(keyed("ZRANGE", self.prefixed(key)).arg(start).arg(stop))
            .await
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<RangeLimit>,
    ) -> Result<Vec<String>> {
        let mut cmd = keyed("ZRANGEBYSCORE", self.prefixed(key));
        cmd.arg(min.to_string()).arg(max.to_string());
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(limit.offset).arg(limit.count);
        }
        self.query_or_default(&cmd).await
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64> {
        self.query_or_default(
            keyed("ZREMRANGEBYSCORE", self.prefixed(key))
                .arg(min.to_string())
                .arg(max.to_string()),
        )
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.query_or_default(&keyed("ZCARD", self.prefixed(key))).await
    }

    async fn zincrby(&self, key: &str, increment: f64, member: &str) -> Result<f64> {
        self.query(keyed("ZINCRBY", self.prefixed(key)).arg(increment).arg(member))
            .await
    }

    /// Lists the namespace on the server, then filters with the shared glob
    /// matcher so both backends agree on what a pattern means.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = GlobPattern::new(pattern)?;
        let raw: Vec<String> = self.query(redis::cmd("KEYS").arg(self.namespace_glob())).await?;
        let mut keys: Vec<String> = raw
            .into_iter()
            .map(|key| self.strip_prefix(key))
            .filter(|key| pattern.is_match(key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn scan(&self, cursor: &str, options: ScanOptions) -> Result<ScanPage> {
        let pattern = GlobPattern::new(options.pattern.as_deref().unwrap_or("*"))?;
        let count = options.count.unwrap_or(DEFAULT_SCAN_COUNT).max(1);

        let (next, raw): (String, Vec<String>) = self
            .query(
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(self.namespace_glob())
                    .arg("COUNT")
                    .arg(count),
            )
            .await?;

        let keys = raw
            .into_iter()
            .map(|key| self.strip_prefix(key))
            .filter(|key| pattern.is_match(key))
            .collect();
        Ok(ScanPage { cursor: next, keys })
    }

    /// Returns the server's receiver count: one per subscribed connection
    /// anywhere, so several callbacks behind one channel count once.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        self.query(redis::cmd("PUBLISH").arg(channel).arg(message))
            .await
    }

    async fn subscribe(&self, channel: &str, callback: MessageCallback) -> Result<()> {
        self.add_listener(Selector::Channel(channel.to_string()), callback)
            .await
    }

    async fn psubscribe(&self, pattern: &str, callback: MessageCallback) -> Result<()> {
        self.add_listener(Selector::pattern(pattern)?, callback).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.remove_listener(&Selector::Channel(channel.to_string()))
            .await
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<()> {
        match Selector::pattern(pattern) {
            Ok(selector) => self.remove_listener(&selector).await,
            // Never registered: registration compiles the same pattern.
            Err(_) => Ok(()),
        }
    }

    /// Sent as one `MULTI`/`EXEC` block. Redis runs the commands in order
    /// without interleaving, but does not roll back earlier commands when a
    /// later one fails.
    async fn exec_batch(&self, commands: Vec<Command>) -> Result<Vec<CommandResult>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            pipe.add_command(self.to_cmd(command)?);
        }

        let mut conn = self.conn().await?;
        let replies: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        if replies.len() != commands.len() {
            return Err(StoreError::Command(format!(
                "Transaction returned {} replies for {} commands",
                replies.len(),
                commands.len()
            )));
        }

        commands
            .iter()
            .zip(replies.iter())
            .map(|(command, reply)| decode_reply(command, reply))
            .collect()
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<CommandResult> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len()).arg(self.prefixed_all(keys)).arg(args);
        let reply: redis::Value = self.query(&cmd).await?;
        Ok(value_to_result(&reply))
    }

    fn multi(&self) -> Transaction<'_> {
        Transaction::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(prefix: &str) -> RedisStore {
        RedisStore::new(RedisOptions::new("redis://127.0.0.1:6379").with_prefix(prefix)).unwrap()
    }

    #[test]
    fn test_missing_url_is_configuration_error() {
        let err = RedisStore::new(RedisOptions::new("")).err().unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));

        let err = RedisStore::new(RedisOptions::new("not a url")).err().unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn test_prefixing() {
        let app = store("app:");
        assert_eq!(app.prefixed("user:1"), "app:user:1");
        assert_eq!(app.strip_prefix("app:user:1".to_string()), "user:1");
        assert_eq!(app.strip_prefix("other".to_string()), "other");
        assert_eq!(app.namespace_glob(), "app:*");

        let odd = store("we*ird[");
        assert_eq!(odd.namespace_glob(), "we\\*ird\\[*");
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let max = Duration::from_millis(2000);
        assert_eq!(retry_delay(1, max), Duration::from_millis(50));
        assert_eq!(retry_delay(10, max), Duration::from_millis(500));
        assert_eq!(retry_delay(100, max), max);
    }

    #[test]
    fn test_set_command_arguments() {
        let store = store("p:");
        let packed = store
            .set_cmd("k", "v", SetOptions::ex(2).nx())
            .unwrap()
            .get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        assert!(text.contains("p:k"));
        assert!(text.contains("PX"));
        assert!(text.contains("2000"));
        assert!(text.contains("NX"));

        assert!(store
            .set_cmd("k", "v", SetOptions::default().nx().xx())
            .is_err());
    }

    #[test]
    fn test_decode_reply_matches_embedded_shapes() {
        let get = Command::Get("k".into());
        assert_eq!(
            decode_reply(&get, &redis::Value::Data(b"v".to_vec())).unwrap(),
            CommandResult::Text("v".into())
        );
        assert_eq!(
            decode_reply(&get, &redis::Value::Nil).unwrap(),
            CommandResult::Nil
        );

        let exists = Command::Exists("k".into());
        assert_eq!(
            decode_reply(&exists, &redis::Value::Int(1)).unwrap(),
            CommandResult::Bool(true)
        );

        let zscore = Command::ZScore("z".into(), "m".into());
        assert_eq!(
            decode_reply(&zscore, &redis::Value::Data(b"1.5".to_vec())).unwrap(),
            CommandResult::Float(1.5)
        );

        let set = Command::Set {
            key: "k".into(),
            value: "v".into(),
            options: SetOptions::default(),
        };
        assert_eq!(
            decode_reply(&set, &redis::Value::Okay).unwrap(),
            CommandResult::Ok
        );
    }

    #[test]
    fn test_value_to_result() {
        let value = redis::Value::Bulk(vec![
            redis::Value::Int(1),
            redis::Value::Data(b"x".to_vec()),
            redis::Value::Nil,
        ]);
        assert_eq!(
            value_to_result(&value),
            CommandResult::Array(vec![
                CommandResult::Int(1),
                CommandResult::Text("x".into()),
                CommandResult::Nil,
            ])
        );
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let store = store("p:");
        assert!(!store.is_connected());
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_retries() {
        let options = RedisOptions {
            url: "redis://127.0.0.1:1".to_string(),
            key_prefix: String::new(),
            max_retries: 2,
            max_retry_delay: Duration::from_millis(10),
        };
        let store = RedisStore::new(options).unwrap();
        let err = store.connect().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!store.is_connected());
    }

    const CH_SUBSCRIBED: &[u8] = b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n";

    fn message_frame(channel: &str, payload: &str) -> Vec<u8> {
        format!(
            "*3\r\n$7\r\nmessage\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
            channel.len(),
            channel,
            payload.len(),
            payload
        )
        .into_bytes()
    }

    fn recorder() -> (Arc<std::sync::Mutex<Vec<String>>>, MessageCallback) {
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        let callback: MessageCallback = Arc::new(move |channel: &str, message: &str| {
            sink.lock().unwrap().push(format!("{}={}", channel, message));
        });
        (received, callback)
    }

    fn fast_retry(url: &str) -> RedisOptions {
        RedisOptions {
            max_retries: 2,
            max_retry_delay: Duration::from_millis(10),
            ..RedisOptions::new(url)
        }
    }

    /// Serves one subscriber connection per entry of `rounds`: acknowledges
    /// the subscription, then writes that round's frames in a single write.
    /// Every connection but the last is closed afterwards. Returns the URL and
    /// the commands each connection sent.
    async fn scripted_server(
        rounds: Vec<Vec<u8>>,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let last = rounds.len() - 1;
            for (round, frames) in rounds.into_iter().enumerate() {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 512];
                let n = socket.read(&mut buf).await.unwrap();
                let _ = seen_tx.send(String::from_utf8_lossy(&buf[..n]).to_string());

                socket.write_all(CH_SUBSCRIBED).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                socket.write_all(&frames).await.unwrap();

                if round == last {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });
        (url, seen_rx)
    }

    #[tokio::test]
    async fn test_subscriber_delivers_every_message_of_one_read() {
        let mut burst = message_frame("ch", "one");
        burst.extend(message_frame("ch", "two"));
        burst.extend(message_frame("ch", "three"));
        let (url, _) = scripted_server(vec![burst]).await;

        let store = RedisStore::new(fast_retry(&url)).unwrap();
        let (received, callback) = recorder();
        store.subscribe("ch", callback).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*received.lock().unwrap(), vec!["ch=one", "ch=two", "ch=three"]);
        store.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_survives_dropped_connection() {
        let (url, mut seen) = scripted_server(vec![
            message_frame("ch", "before"),
            message_frame("ch", "after"),
        ])
        .await;

        let store = RedisStore::new(fast_retry(&url)).unwrap();
        let (received, callback) = recorder();
        store.subscribe("ch", callback).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*received.lock().unwrap(), vec!["ch=before", "ch=after"]);

        for _ in 0..2 {
            let sent = seen.recv().await.unwrap();
            assert!(sent.contains("SUBSCRIBE"), "unexpected command: {}", sent);
            assert!(sent.contains("ch"));
        }
        store.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_registration() {
        let store = RedisStore::new(fast_retry("redis://127.0.0.1:1")).unwrap();
        let (_, callback) = recorder();

        let err = store.subscribe("ch", callback.clone()).await.unwrap_err();
        assert!(err.is_connection());
        assert!(store.subscriptions.read().unwrap().is_empty());
        assert!(store.listeners.lock().await.is_empty());

        // Still the first subscriber, so the connection is attempted again.
        assert!(store.subscribe("ch", callback.clone()).await.is_err());
        assert!(store.psubscribe("c*", callback).await.is_err());
        assert!(store.subscriptions.read().unwrap().is_empty());
    }

    fn live_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_live_parity_with_embedded_backend() {
        let prefix = format!("kvthrottle-test:{}:", uuid::Uuid::new_v4());
        let store = RedisStore::new(RedisOptions::new(&live_url()).with_prefix(&prefix)).unwrap();
        store.connect().await.unwrap();

        store.set("user:1", "a", SetOptions::default()).await.unwrap();
        store.set("user:abc", "b", SetOptions::ex(30)).await.unwrap();
        store.set("users:1", "c", SetOptions::default()).await.unwrap();
        assert_eq!(store.keys("user:*").await.unwrap(), vec!["user:1", "user:abc"]);
        let ttl = store.ttl("user:abc").await.unwrap();
        assert!(ttl > 0 && ttl <= 30);

        store.zadd("z", 1.0, "a").await.unwrap();
        store.zadd("z", 2.0, "b").await.unwrap();
        store.zadd("z", 1.5, "c").await.unwrap();
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["a", "c", "b"]);

        store.lpush("l", &["a", "b", "c"]).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["c", "b", "a"]);
        assert!(store.hgetall("l").await.unwrap().is_empty());

        let results = store.multi().incr("n").incr("n").get("n").exec().await.unwrap();
        assert_eq!(results[2], CommandResult::Text("2".into()));

        let keys = store.keys("*").await.unwrap();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        store.del(&keys).await.unwrap();
        store.disconnect().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_live_pattern_subscription() {
        use std::sync::atomic::AtomicUsize;

        let store = RedisStore::new(RedisOptions::new(&live_url())).unwrap();
        store.connect().await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        store
            .psubscribe(
                "kvthrottle-news:*",
                Arc::new(move |_: &str, _: &str| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.publish("kvthrottle-news:1", "hello").await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // A second callback shares the connection: still one receiver.
        let seen = hits.clone();
        store
            .psubscribe(
                "kvthrottle-news:*",
                Arc::new(move |_: &str, _: &str| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        assert_eq!(store.publish("kvthrottle-news:2", "again").await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        store.disconnect().await.unwrap();
    }
}
