//! Synchronous keyspace behind [`MemoryStore`](super::MemoryStore).
//!
//! Every method takes the current time and drops the touched key first if it
//! has expired, so callers never observe a stale entry between sweeps.

use std::collections::{HashMap, HashSet, VecDeque};

use super::entry::{Entry, SortedSet, Value};
use super::transaction::{Command, CommandResult};
use super::{normalize_range, RangeLimit, ScoreBound, SetOptions};
use crate::error::{Result, StoreError};
use crate::glob::GlobPattern;

/// Fetches the collection stored at `key`, replacing an entry of another kind
/// with an empty one of the requested kind.
macro_rules! writable {
    ($self:ident, $key:expr, $now:expr, $variant:ident, $empty:expr) => {{
        $self.drop_if_expired($key, $now);
        let entry = $self
            .entries
            .entry($key.to_string())
            .or_insert_with(|| Entry::new(Value::$variant($empty)));
        if !matches!(entry.value, Value::$variant(_)) {
            *entry = Entry::new(Value::$variant($empty));
        }
        match &mut entry.value {
            Value::$variant(inner) => inner,
            _ => unreachable!("entry was just replaced"),
        }
    }};
}

#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - self.entries.len()
    }

    fn drop_if_expired(&mut self, key: &str, now_ms: u64) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now_ms))
        {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str, now_ms: u64) -> Option<&Value> {
        self.drop_if_expired(key, now_ms);
        self.entries.get(key).map(|entry| &entry.value)
    }

    fn live_mut(&mut self, key: &str, now_ms: u64) -> Option<&mut Value> {
        self.drop_if_expired(key, now_ms);
        self.entries.get_mut(key).map(|entry| &mut entry.value)
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty_collection())
        {
            self.entries.remove(key);
        }
    }

    // Strings and keys

    pub fn get(&mut self, key: &str, now_ms: u64) -> Option<String> {
        match self.live(key, now_ms) {
            Some(Value::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str, options: SetOptions, now_ms: u64) -> Result<bool> {
        let ttl_ms = options.ttl_millis()?;
        let exists = self.live(key, now_ms).is_some();
        if (options.nx && exists) || (options.xx && !exists) {
            return Ok(false);
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::String(value.to_string()),
                expires_at_ms: ttl_ms.map(|ttl| now_ms.saturating_add(ttl)),
            },
        );
        Ok(true)
    }

    pub fn del(&mut self, keys: &[&str], now_ms: u64) -> u64 {
        let mut removed = 0;
        for key in keys {
            self.drop_if_expired(key, now_ms);
            if self.entries.remove(*key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn exists(&mut self, key: &str, now_ms: u64) -> bool {
        self.live(key, now_ms).is_some()
    }

    pub fn incr_by(&mut self, key: &str, delta: i64, now_ms: u64) -> Result<i64> {
        self.drop_if_expired(key, now_ms);
        let (current, expires_at_ms) = match self.entries.get(key) {
            Some(Entry {
                value: Value::String(raw),
                expires_at_ms,
            }) => (
                raw.trim().parse::<i64>().map_err(|_| StoreError::NotAnInteger)?,
                *expires_at_ms,
            ),
            _ => (0, None),
        };
        let next = current.checked_add(delta).ok_or(StoreError::NotAnInteger)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::String(next.to_string()),
                expires_at_ms,
            },
        );
        Ok(next)
    }

    pub fn pexpire(&mut self, key: &str, millis: i64, now_ms: u64) -> bool {
        self.drop_if_expired(key, now_ms);
        if millis <= 0 {
            return self.entries.remove(key).is_some();
        }
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = Some(now_ms.saturating_add(millis as u64));
                true
            }
            None => false,
        }
    }

    pub fn pttl(&mut self, key: &str, now_ms: u64) -> i64 {
        self.drop_if_expired(key, now_ms);
        match self.entries.get(key) {
            None => -2,
            Some(Entry {
                expires_at_ms: None,
                ..
            }) => -1,
            Some(Entry {
                expires_at_ms: Some(at),
                ..
            }) => at.saturating_sub(now_ms) as i64,
        }
    }

    // Hashes

    pub fn hget(&mut self, key: &str, field: &str, now_ms: u64) -> Option<String> {
        match self.live(key, now_ms) {
            Some(Value::Hash(map)) => map.get(field).cloned(),
            _ => None,
        }
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str, now_ms: u64) -> bool {
        let map = writable!(self, key, now_ms, Hash, HashMap::new());
        map.insert(field.to_string(), value.to_string()).is_none()
    }

    pub fn hmset(&mut self, key: &str, fields: &[(&str, &str)], now_ms: u64) {
        let map = writable!(self, key, now_ms, Hash, HashMap::new());
        for (field, value) in fields {
            map.insert(field.to_string(), value.to_string());
        }
        self.drop_if_empty(key);
    }

    pub fn hgetall(&mut self, key: &str, now_ms: u64) -> HashMap<String, String> {
        match self.live(key, now_ms) {
            Some(Value::Hash(map)) => map.clone(),
            _ => HashMap::new(),
        }
    }

    pub fn hdel(&mut self, key: &str, fields: &[&str], now_ms: u64) -> u64 {
        let removed = match self.live_mut(key, now_ms) {
            Some(Value::Hash(map)) => fields.iter().filter(|f| map.remove(**f).is_some()).count(),
            _ => 0,
        };
        self.drop_if_empty(key);
        removed as u64
    }

    pub fn hexists(&mut self, key: &str, field: &str, now_ms: u64) -> bool {
        matches!(self.live(key, now_ms), Some(Value::Hash(map)) if map.contains_key(field))
    }

    pub fn hkeys(&mut self, key: &str, now_ms: u64) -> Vec<String> {
        match self.live(key, now_ms) {
            Some(Value::Hash(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn hlen(&mut self, key: &str, now_ms: u64) -> u64 {
        match self.live(key, now_ms) {
            Some(Value::Hash(map)) => map.len() as u64,
            _ => 0,
        }
    }

    // Sets

    pub fn sadd(&mut self, key: &str, members: &[&str], now_ms: u64) -> u64 {
        let set = writable!(self, key, now_ms, Set, HashSet::new());
        let added = members
            .iter()
            .filter(|m| set.insert(m.to_string()))
            .count();
        self.drop_if_empty(key);
        added as u64
    }

    pub fn srem(&mut self, key: &str, members: &[&str], now_ms: u64) -> u64 {
        let removed = match self.live_mut(key, now_ms) {
            Some(Value::Set(set)) => members.iter().filter(|m| set.remove(**m)).count(),
            _ => 0,
        };
        self.drop_if_empty(key);
        removed as u64
    }

    pub fn smembers(&mut self, key: &str, now_ms: u64) -> Vec<String> {
        match self.live(key, now_ms) {
            Some(Value::Set(set)) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                members
            }
            _ => Vec::new(),
        }
    }

    pub fn sismember(&mut self, key: &str, member: &str, now_ms: u64) -> bool {
        matches!(self.live(key, now_ms), Some(Value::Set(set)) if set.contains(member))
    }

    pub fn scard(&mut self, key: &str, now_ms: u64) -> u64 {
        match self.live(key, now_ms) {
            Some(Value::Set(set)) => set.len() as u64,
            _ => 0,
        }
    }

    // Lists

    pub fn lpush(&mut self, key: &str, values: &[&str], now_ms: u64) -> u64 {
        let list = writable!(self, key, now_ms, List, VecDeque::new());
        for value in values {
            list.push_front(value.to_string());
        }
        let len = list.len() as u64;
        self.drop_if_empty(key);
        len
    }

    pub fn rpush(&mut self, key: &str, values: &[&str], now_ms: u64) -> u64 {
        let list = writable!(self, key, now_ms, List, VecDeque::new());
        for value in values {
            list.push_back(value.to_string());
        }
        let len = list.len() as u64;
        self.drop_if_empty(key);
        len
    }

    pub fn lpop(&mut self, key: &str, now_ms: u64) -> Option<String> {
        let popped = match self.live_mut(key, now_ms) {
            Some(Value::List(list)) => list.pop_front(),
            _ => None,
        };
        self.drop_if_empty(key);
        popped
    }

    pub fn rpop(&mut self, key: &str, now_ms: u64) -> Option<String> {
        let popped = match self.live_mut(key, now_ms) {
            Some(Value::List(list)) => list.pop_back(),
            _ => None,
        };
        self.drop_if_empty(key);
        popped
    }

    pub fn lrange(&mut self, key: &str, start: i64, stop: i64, now_ms: u64) -> Vec<String> {
        match self.live(key, now_ms) {
            Some(Value::List(list)) => match normalize_range(start, stop, list.len()) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    pub fn llen(&mut self, key: &str, now_ms: u64) -> u64 {
        match self.live(key, now_ms) {
            Some(Value::List(list)) => list.len() as u64,
            _ => 0,
        }
    }

    pub fn ltrim(&mut self, key: &str, start: i64, stop: i64, now_ms: u64) {
        if let Some(Value::List(list)) = self.live_mut(key, now_ms) {
            match normalize_range(start, stop, list.len()) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
                None => list.clear(),
            }
        }
        self.drop_if_empty(key);
    }

    // Sorted sets

    pub fn zadd(&mut self, key: &str, score: f64, member: &str, now_ms: u64) -> u64 {
        let zset = writable!(self, key, now_ms, SortedSet, SortedSet::new());
        u64::from(zset.upsert(member, score))
    }

    pub fn zrem(&mut self, key: &str, members: &[&str], now_ms: u64) -> u64 {
        let removed = match self.live_mut(key, now_ms) {
            Some(Value::SortedSet(zset)) => members.iter().filter(|m| zset.remove(m)).count(),
            _ => 0,
        };
        self.drop_if_empty(key);
        removed as u64
    }

    pub fn zscore(&mut self, key: &str, member: &str, now_ms: u64) -> Option<f64> {
        match self.live(key, now_ms) {
            Some(Value::SortedSet(zset)) => zset.score(member),
            _ => None,
        }
    }

    pub fn zrange(&mut self, key: &str, start: i64, stop: i64, now_ms: u64) -> Vec<String> {
        match self.live(key, now_ms) {
            Some(Value::SortedSet(zset)) => match normalize_range(start, stop, zset.len()) {
                Some((from, to)) => zset.members()[from..=to]
                    .iter()
                    .map(|m| m.member.clone())
                    .collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    pub fn zrangebyscore(
        &mut self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<RangeLimit>,
        now_ms: u64,
    ) -> Vec<String> {
        let Some(Value::SortedSet(zset)) = self.live(key, now_ms) else {
            return Vec::new();
        };
        let (offset, count) = match limit {
            Some(limit) => (limit.offset, limit.count),
            None => (0, usize::MAX),
        };
        zset.members()
            .iter()
            .filter(|m| min.admits_as_min(m.score) && max.admits_as_max(m.score))
            .skip(offset)
            .take(count)
            .map(|m| m.member.clone())
            .collect()
    }

    pub fn zremrangebyscore(&mut self, key: &str, min: ScoreBound, max: ScoreBound, now_ms: u64) -> u64 {
        let removed = match self.live_mut(key, now_ms) {
            Some(Value::SortedSet(zset)) => {
                zset.retain(|m| !(min.admits_as_min(m.score) && max.admits_as_max(m.score)))
            }
            _ => 0,
        };
        self.drop_if_empty(key);
        removed as u64
    }

    pub fn zcard(&mut self, key: &str, now_ms: u64) -> u64 {
        match self.live(key, now_ms) {
            Some(Value::SortedSet(zset)) => zset.len() as u64,
            _ => 0,
        }
    }

    pub fn zincrby(&mut self, key: &str, increment: f64, member: &str, now_ms: u64) -> f64 {
        let zset = writable!(self, key, now_ms, SortedSet, SortedSet::new());
        let score = zset.score(member).unwrap_or(0.0) + increment;
        zset.upsert(member, score);
        score
    }

    // Scanning

    /// Live keys matching `pattern`, sorted so that scan offsets are stable.
    pub fn keys(&mut self, pattern: &GlobPattern, now_ms: u64) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now_ms) && pattern.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Runs one queued command.
    pub fn apply(&mut self, command: &Command, now_ms: u64) -> Result<CommandResult> {
        let result = match command {
            Command::Get(key) => opt_text(self.get(key, now_ms)),
            Command::Set {
                key,
                value,
                options,
            } => {
                if self.set(key, value, *options, now_ms)? {
                    CommandResult::Ok
                } else {
                    CommandResult::Nil
                }
            }
            Command::Del(keys) => {
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                int(self.del(&keys, now_ms))
            }
            Command::Exists(key) => CommandResult::Bool(self.exists(key, now_ms)),
            Command::IncrBy(key, delta) => CommandResult::Int(self.incr_by(key, *delta, now_ms)?),
            Command::PExpire(key, millis) => CommandResult::Bool(self.pexpire(key, *millis, now_ms)),
            Command::Ttl(key) => {
                let pttl = self.pttl(key, now_ms);
                CommandResult::Int(if pttl < 0 { pttl } else { (pttl + 999) / 1000 })
            }
            Command::PTtl(key) => CommandResult::Int(self.pttl(key, now_ms)),
            Command::HGet(key, field) => opt_text(self.hget(key, field, now_ms)),
            Command::HSet(key, field, value) => {
                CommandResult::Bool(self.hset(key, field, value, now_ms))
            }
            Command::HDel(key, fields) => {
                let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
                int(self.hdel(key, &fields, now_ms))
            }
            Command::HGetAll(key) => CommandResult::Map(self.hgetall(key, now_ms)),
            Command::SAdd(key, members) => {
                let members: Vec<&str> = members.iter().map(String::as_str).collect();
                int(self.sadd(key, &members, now_ms))
            }
            Command::SRem(key, members) => {
                let members: Vec<&str> = members.iter().map(String::as_str).collect();
                int(self.srem(key, &members, now_ms))
            }
            Command::SIsMember(key, member) => {
                CommandResult::Bool(self.sismember(key, member, now_ms))
            }
            Command::SMembers(key) => CommandResult::List(self.smembers(key, now_ms)),
            Command::LPush(key, values) => {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                int(self.lpush(key, &values, now_ms))
            }
            Command::RPush(key, values) => {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                int(self.rpush(key, &values, now_ms))
            }
            Command::LRange(key, start, stop) => {
                CommandResult::List(self.lrange(key, *start, *stop, now_ms))
            }
            Command::ZAdd(key, score, member) => int(self.zadd(key, *score, member, now_ms)),
            Command::ZRem(key, members) => {
                let members: Vec<&str> = members.iter().map(String::as_str).collect();
                int(self.zrem(key, &members, now_ms))
            }
            Command::ZScore(key, member) => match self.zscore(key, member, now_ms) {
                Some(score) => CommandResult::Float(score),
                None => CommandResult::Nil,
            },
            Command::ZCard(key) => int(self.zcard(key, now_ms)),
            Command::ZRange(key, start, stop) => {
                CommandResult::List(self.zrange(key, *start, *stop, now_ms))
            }
            Command::ZRangeByScore(key, min, max) => {
                CommandResult::List(self.zrangebyscore(key, *min, *max, None, now_ms))
            }
            Command::ZRemRangeByScore(key, min, max) => {
                int(self.zremrangebyscore(key, *min, *max, now_ms))
            }
            Command::ZIncrBy(key, increment, member) => {
                CommandResult::Float(self.zincrby(key, *increment, member, now_ms))
            }
        };
        Ok(result)
    }
}

fn int(n: u64) -> CommandResult {
    CommandResult::Int(n as i64)
}

fn opt_text(value: Option<String>) -> CommandResult {
    value.map_or(CommandResult::Nil, CommandResult::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    #[test]
    fn test_lazy_expiry_on_read() {
        let mut ks = Keyspace::new();
        ks.set("a", "1", SetOptions::px(100), NOW).unwrap();
        assert_eq!(ks.get("a", NOW + 99), Some("1".to_string()));
        assert_eq!(ks.get("a", NOW + 100), None);
        assert!(ks.is_empty());
    }

    #[test]
    fn test_sweep_drops_expired_only() {
        let mut ks = Keyspace::new();
        ks.set("short", "1", SetOptions::px(10), NOW).unwrap();
        ks.set("long", "1", SetOptions::px(10_000), NOW).unwrap();
        ks.set("forever", "1", SetOptions::default(), NOW).unwrap();
        assert_eq!(ks.sweep(NOW + 20), 1);
        assert_eq!(ks.len(), 2);
    }

    #[test]
    fn test_nx_xx_preconditions() {
        let mut ks = Keyspace::new();
        assert!(!ks.set("k", "v", SetOptions::default().xx(), NOW).unwrap());
        assert!(ks.set("k", "v", SetOptions::default().nx(), NOW).unwrap());
        assert!(!ks.set("k", "w", SetOptions::default().nx(), NOW).unwrap());
        assert_eq!(ks.get("k", NOW), Some("v".to_string()));
        assert!(ks.set("k", "w", SetOptions::default().xx(), NOW).unwrap());
        assert_eq!(ks.get("k", NOW), Some("w".to_string()));
    }

    #[test]
    fn test_set_without_ttl_clears_expiry() {
        let mut ks = Keyspace::new();
        ks.set("k", "v", SetOptions::ex(10), NOW).unwrap();
        ks.set("k", "v", SetOptions::default(), NOW).unwrap();
        assert_eq!(ks.pttl("k", NOW), -1);
    }

    #[test]
    fn test_incr_preserves_expiry() {
        let mut ks = Keyspace::new();
        ks.set("n", "5", SetOptions::px(5_000), NOW).unwrap();
        assert_eq!(ks.incr_by("n", 3, NOW + 1_000).unwrap(), 8);
        assert_eq!(ks.pttl("n", NOW + 1_000), 4_000);
        assert_eq!(ks.incr_by("missing", -1, NOW).unwrap(), -1);
    }

    #[test]
    fn test_incr_rejects_non_integer() {
        let mut ks = Keyspace::new();
        ks.set("s", "abc", SetOptions::default(), NOW).unwrap();
        assert!(matches!(ks.incr_by("s", 1, NOW), Err(StoreError::NotAnInteger)));
        ks.set("max", &i64::MAX.to_string(), SetOptions::default(), NOW).unwrap();
        assert!(ks.incr_by("max", 1, NOW).is_err());
    }

    #[test]
    fn test_pttl_conventions() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.pttl("nope", NOW), -2);
        ks.set("k", "v", SetOptions::default(), NOW).unwrap();
        assert_eq!(ks.pttl("k", NOW), -1);
        assert!(ks.pexpire("k", 250, NOW));
        assert_eq!(ks.pttl("k", NOW + 50), 200);
        assert!(!ks.pexpire("nope", 250, NOW));
        assert!(ks.pexpire("k", 0, NOW));
        assert!(!ks.exists("k", NOW));
    }

    #[test]
    fn test_wrong_kind_reads_as_empty() {
        let mut ks = Keyspace::new();
        ks.set("k", "v", SetOptions::default(), NOW).unwrap();
        assert!(ks.hgetall("k", NOW).is_empty());
        assert!(ks.smembers("k", NOW).is_empty());
        assert!(ks.lrange("k", 0, -1, NOW).is_empty());
        assert_eq!(ks.zcard("k", NOW), 0);
        assert_eq!(ks.get("k", NOW), Some("v".to_string()));
    }

    #[test]
    fn test_wrong_kind_write_replaces() {
        let mut ks = Keyspace::new();
        ks.set("k", "v", SetOptions::ex(100), NOW).unwrap();
        assert!(ks.hset("k", "f", "1", NOW));
        assert_eq!(ks.get("k", NOW), None);
        assert_eq!(ks.hget("k", "f", NOW), Some("1".to_string()));
        assert_eq!(ks.pttl("k", NOW), -1);
    }

    #[test]
    fn test_hash_operations() {
        let mut ks = Keyspace::new();
        assert!(ks.hset("h", "a", "1", NOW));
        assert!(!ks.hset("h", "a", "2", NOW));
        ks.hmset("h", &[("b", "3"), ("c", "4")], NOW);
        assert_eq!(ks.hlen("h", NOW), 3);
        assert!(ks.hexists("h", "b", NOW));
        let mut keys = ks.hkeys("h", NOW);
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(ks.hdel("h", &["a", "b", "zz"], NOW), 2);
        assert_eq!(ks.hdel("h", &["c"], NOW), 1);
        assert!(!ks.exists("h", NOW));
    }

    #[test]
    fn test_set_operations() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.sadd("s", &["b", "a", "b"], NOW), 2);
        assert_eq!(ks.smembers("s", NOW), vec!["a", "b"]);
        assert!(ks.sismember("s", "a", NOW));
        assert_eq!(ks.srem("s", &["a", "x"], NOW), 1);
        assert_eq!(ks.scard("s", NOW), 1);
    }

    #[test]
    fn test_lpush_reverses_arguments() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.rpush("l", &["x"], NOW), 1);
        assert_eq!(ks.lpush("l", &["a", "b", "c"], NOW), 4);
        assert_eq!(ks.lrange("l", 0, -1, NOW), vec!["c", "b", "a", "x"]);
        assert_eq!(ks.lpop("l", NOW), Some("c".to_string()));
        assert_eq!(ks.rpop("l", NOW), Some("x".to_string()));
        assert_eq!(ks.llen("l", NOW), 2);
    }

    #[test]
    fn test_lrange_negative_indices() {
        let mut ks = Keyspace::new();
        ks.rpush("l", &["a", "b", "c", "d", "e"], NOW);
        let len = ks.llen("l", NOW) as i64;
        assert_eq!(ks.lrange("l", -2, -1, NOW), ks.lrange("l", len - 2, len - 1, NOW));
        assert_eq!(ks.lrange("l", -2, -1, NOW), vec!["d", "e"]);
        assert_eq!(ks.lrange("l", 1, 2, NOW), vec!["b", "c"]);
        assert!(ks.lrange("l", 4, 2, NOW).is_empty());
    }

    #[test]
    fn test_ltrim_keeps_slice() {
        let mut ks = Keyspace::new();
        ks.rpush("l", &["a", "b", "c", "d", "e"], NOW);
        ks.ltrim("l", 1, -2, NOW);
        assert_eq!(ks.lrange("l", 0, -1, NOW), vec!["b", "c", "d"]);
        ks.ltrim("l", 5, 10, NOW);
        assert!(!ks.exists("l", NOW));
    }

    #[test]
    fn test_sorted_set_example() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.zadd("z", 1.0, "a", NOW), 1);
        assert_eq!(ks.zadd("z", 2.0, "b", NOW), 1);
        assert_eq!(ks.zadd("z", 1.5, "c", NOW), 1);
        assert_eq!(ks.zrange("z", 0, -1, NOW), vec!["a", "c", "b"]);
        assert_eq!(ks.zadd("z", 0.5, "b", NOW), 0);
        assert_eq!(ks.zrange("z", 0, -1, NOW), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_zrangebyscore_with_limit() {
        let mut ks = Keyspace::new();
        for (i, member) in ["a", "b", "c", "d"].iter().enumerate() {
            ks.zadd("z", i as f64, member, NOW);
        }
        assert_eq!(
            ks.zrangebyscore("z", ScoreBound::Inclusive(1.0), ScoreBound::PosInf, None, NOW),
            vec!["b", "c", "d"]
        );
        assert_eq!(
            ks.zrangebyscore(
                "z",
                ScoreBound::NegInf,
                ScoreBound::PosInf,
                Some(RangeLimit { offset: 1, count: 2 }),
                NOW
            ),
            vec!["b", "c"]
        );
        assert_eq!(
            ks.zremrangebyscore("z", ScoreBound::NegInf, ScoreBound::Exclusive(2.0), NOW),
            2
        );
        assert_eq!(ks.zrange("z", 0, -1, NOW), vec!["c", "d"]);
    }

    #[test]
    fn test_zincrby_and_zscore() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.zincrby("z", 2.5, "m", NOW), 2.5);
        assert_eq!(ks.zincrby("z", 1.0, "m", NOW), 3.5);
        assert_eq!(ks.zscore("z", "m", NOW), Some(3.5));
        assert_eq!(ks.zscore("z", "x", NOW), None);
        assert_eq!(ks.zrem("z", &["m"], NOW), 1);
        assert!(!ks.exists("z", NOW));
    }

    #[test]
    fn test_keys_skips_expired() {
        let mut ks = Keyspace::new();
        ks.set("user:1", "a", SetOptions::default(), NOW).unwrap();
        ks.set("user:abc", "b", SetOptions::default(), NOW).unwrap();
        ks.set("users:1", "c", SetOptions::default(), NOW).unwrap();
        ks.set("user:old", "d", SetOptions::px(1), NOW).unwrap();
        let pattern = GlobPattern::new("user:*").unwrap();
        assert_eq!(ks.keys(&pattern, NOW + 5), vec!["user:1", "user:abc"]);
    }

    #[test]
    fn test_apply_commands() {
        let mut ks = Keyspace::new();
        let results: Vec<CommandResult> = [
            Command::IncrBy("c".into(), 2),
            Command::Get("c".into()),
            Command::ZAdd("z".into(), 1.0, "m".into()),
            Command::ZCard("z".into()),
            Command::PTtl("c".into()),
        ]
        .iter()
        .map(|cmd| ks.apply(cmd, NOW).unwrap())
        .collect();
        assert_eq!(
            results,
            vec![
                CommandResult::Int(2),
                CommandResult::Text("2".into()),
                CommandResult::Int(1),
                CommandResult::Int(1),
                CommandResult::Int(-1),
            ]
        );
    }
}
