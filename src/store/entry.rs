//! Values held by the embedded backend.

use std::collections::{HashMap, HashSet, VecDeque};

/// The data structure stored under one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
    SortedSet(SortedSet),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Hash(_) => ValueKind::Hash,
            Value::Set(_) => ValueKind::Set,
            Value::List(_) => ValueKind::List,
            Value::SortedSet(_) => ValueKind::SortedSet,
        }
    }

    /// Collections left empty by a removal are dropped from the keyspace.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::SortedSet(zset) => zset.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Hash,
    Set,
    List,
    SortedSet,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Hash => "hash",
            ValueKind::Set => "set",
            ValueKind::List => "list",
            ValueKind::SortedSet => "zset",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub expires_at_ms: Option<u64>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at_ms: None,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortedSetMember {
    pub member: String,
    pub score: f64,
}

/// Members kept in ascending score order. Equal scores keep the order in
/// which they were (re)inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    members: Vec<SortedSetMember>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[SortedSetMember] {
        &self.members
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.members
            .iter()
            .find(|m| m.member == member)
            .map(|m| m.score)
    }

    /// Inserts or rescores `member`. Returns true if it was not present.
    pub fn upsert(&mut self, member: &str, score: f64) -> bool {
        let existed = self.remove(member);
        let at = self.members.partition_point(|m| m.score <= score);
        self.members.insert(
            at,
            SortedSetMember {
                member: member.to_string(),
                score,
            },
        );
        !existed
    }

    pub fn remove(&mut self, member: &str) -> bool {
        match self.members.iter().position(|m| m.member == member) {
            Some(idx) => {
                self.members.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn retain<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&SortedSetMember) -> bool,
    {
        let before = self.members.len();
        self.members.retain(keep);
        before - self.members.len()
    }
}
