//! Queued command batches (`MULTI` / `EXEC`).

use std::collections::HashMap;
use std::mem;

use super::{KvStore, ScoreBound, SetOptions};
use crate::error::Result;

/// A command that can be queued in a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(String),
    Set {
        key: String,
        value: String,
        options: SetOptions,
    },
    Del(Vec<String>),
    Exists(String),
    IncrBy(String, i64),
    PExpire(String, i64),
    Ttl(String),
    PTtl(String),
    HGet(String, String),
    HSet(String, String, String),
    HDel(String, Vec<String>),
    HGetAll(String),
    SAdd(String, Vec<String>),
    SRem(String, Vec<String>),
    SIsMember(String, String),
    SMembers(String),
    LPush(String, Vec<String>),
    RPush(String, Vec<String>),
    LRange(String, i64, i64),
    ZAdd(String, f64, String),
    ZRem(String, Vec<String>),
    ZScore(String, String),
    ZCard(String),
    ZRange(String, i64, i64),
    ZRangeByScore(String, ScoreBound, ScoreBound),
    ZRemRangeByScore(String, ScoreBound, ScoreBound),
    ZIncrBy(String, f64, String),
}

impl Command {
    /// The key the command operates on; `Del` reports its first key.
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Del(keys) => keys.first().map(String::as_str),
            Command::Get(key)
            | Command::Set { key, .. }
            | Command::Exists(key)
            | Command::IncrBy(key, _)
            | Command::PExpire(key, _)
            | Command::Ttl(key)
            | Command::PTtl(key)
            | Command::HGet(key, _)
            | Command::HSet(key, _, _)
            | Command::HDel(key, _)
            | Command::HGetAll(key)
            | Command::SAdd(key, _)
            | Command::SRem(key, _)
            | Command::SIsMember(key, _)
            | Command::SMembers(key)
            | Command::LPush(key, _)
            | Command::RPush(key, _)
            | Command::LRange(key, _, _)
            | Command::ZAdd(key, _, _)
            | Command::ZRem(key, _)
            | Command::ZScore(key, _)
            | Command::ZCard(key)
            | Command::ZRange(key, _, _)
            | Command::ZRangeByScore(key, _, _)
            | Command::ZRemRangeByScore(key, _, _)
            | Command::ZIncrBy(key, _, _) => Some(key),
        }
    }
}

/// The reply to one queued command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Nil,
    Ok,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
    Map(HashMap<String, String>),
    Array(Vec<CommandResult>),
}

impl CommandResult {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CommandResult::Int(n) => Some(*n),
            CommandResult::Bool(b) => Some(i64::from(*b)),
            CommandResult::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CommandResult::Float(f) => Some(*f),
            CommandResult::Int(n) => Some(*n as f64),
            CommandResult::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CommandResult::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            CommandResult::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, CommandResult::Nil)
    }
}

/// Builder returned by `multi()`. Commands run in the order they were queued
/// when [`Transaction::exec`] is awaited.
pub struct Transaction<'a> {
    store: &'a dyn KvStore,
    queue: Vec<Command>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            queue: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued(&self) -> &[Command] {
        &self.queue
    }

    pub fn add(&mut self, command: Command) -> &mut Self {
        self.queue.push(command);
        self
    }

    pub fn get(&mut self, key: &str) -> &mut Self {
        self.add(Command::Get(key.to_string()))
    }

    pub fn set(&mut self, key: &str, value: &str, options: SetOptions) -> &mut Self {
        self.add(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
            options,
        })
    }

    pub fn del(&mut self, keys: &[&str]) -> &mut Self {
        self.add(Command::Del(to_owned(keys)))
    }

    pub fn incr(&mut self, key: &str) -> &mut Self {
        self.incr_by(key, 1)
    }

    pub fn incr_by(&mut self, key: &str, delta: i64) -> &mut Self {
        self.add(Command::IncrBy(key.to_string(), delta))
    }

    pub fn decr(&mut self, key: &str) -> &mut Self {
        self.incr_by(key, -1)
    }

    pub fn expire(&mut self, key: &str, seconds: i64) -> &mut Self {
        self.pexpire(key, seconds.saturating_mul(1000))
    }

    pub fn pexpire(&mut self, key: &str, millis: i64) -> &mut Self {
        self.add(Command::PExpire(key.to_string(), millis))
    }

    pub fn ttl(&mut self, key: &str) -> &mut Self {
        self.add(Command::Ttl(key.to_string()))
    }

    pub fn pttl(&mut self, key: &str) -> &mut Self {
        self.add(Command::PTtl(key.to_string()))
    }

    pub fn hget(&mut self, key: &str, field: &str) -> &mut Self {
        self.add(Command::HGet(key.to_string(), field.to_string()))
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> &mut Self {
        self.add(Command::HSet(
            key.to_string(),
            field.to_string(),
            value.to_string(),
        ))
    }

    pub fn hgetall(&mut self, key: &str) -> &mut Self {
        self.add(Command::HGetAll(key.to_string()))
    }

    pub fn sadd(&mut self, key: &str, members: &[&str]) -> &mut Self {
        self.add(Command::SAdd(key.to_string(), to_owned(members)))
    }

    pub fn rpush(&mut self, key: &str, values: &[&str]) -> &mut Self {
        self.add(Command::RPush(key.to_string(), to_owned(values)))
    }

    pub fn lpush(&mut self, key: &str, values: &[&str]) -> &mut Self {
        self.add(Command::LPush(key.to_string(), to_owned(values)))
    }

    pub fn lrange(&mut self, key: &str, start: i64, stop: i64) -> &mut Self {
        self.add(Command::LRange(key.to_string(), start, stop))
    }

    pub fn zadd(&mut self, key: &str, score: f64, member: &str) -> &mut Self {
        self.add(Command::ZAdd(key.to_string(), score, member.to_string()))
    }

    pub fn zrem(&mut self, key: &str, members: &[&str]) -> &mut Self {
        self.add(Command::ZRem(key.to_string(), to_owned(members)))
    }

    pub fn zcard(&mut self, key: &str) -> &mut Self {
        self.add(Command::ZCard(key.to_string()))
    }

    pub fn zrange(&mut self, key: &str, start: i64, stop: i64) -> &mut Self {
        self.add(Command::ZRange(key.to_string(), start, stop))
    }

    pub fn zremrangebyscore(&mut self, key: &str, min: ScoreBound, max: ScoreBound) -> &mut Self {
        self.add(Command::ZRemRangeByScore(key.to_string(), min, max))
    }

    /// Drops every queued command without running any of them.
    pub fn discard(&mut self) {
        self.queue.clear();
    }

    pub async fn exec(&mut self) -> Result<Vec<CommandResult>> {
        let commands = mem::take(&mut self.queue);
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        self.store.exec_batch(commands).await
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_key() {
        assert_eq!(Command::Get("a".into()).key(), Some("a"));
        assert_eq!(Command::Del(vec![]).key(), None);
        assert_eq!(
            Command::ZRemRangeByScore("z".into(), ScoreBound::NegInf, ScoreBound::PosInf).key(),
            Some("z")
        );
    }

    #[test]
    fn test_command_result_accessors() {
        assert_eq!(CommandResult::Int(3).as_int(), Some(3));
        assert_eq!(CommandResult::Text("42".into()).as_int(), Some(42));
        assert_eq!(CommandResult::Text("1.5".into()).as_float(), Some(1.5));
        assert!(CommandResult::Nil.is_nil());
        assert_eq!(CommandResult::Ok.as_text(), None);
    }
}
