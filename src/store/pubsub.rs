//! Subscriber bookkeeping shared by both backends.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::glob::GlobPattern;

/// Invoked with `(channel, message)` for every delivered message.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct PatternSubscription {
    pattern: GlobPattern,
    callbacks: Vec<MessageCallback>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, Vec<MessageCallback>>,
    patterns: HashMap<String, PatternSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this is the first callback for `channel`.
    pub fn add_channel(&mut self, channel: &str, callback: MessageCallback) -> bool {
        let callbacks = self.channels.entry(channel.to_string()).or_default();
        callbacks.push(callback);
        callbacks.len() == 1
    }

    /// Returns true when this is the first callback for `pattern`.
    pub fn add_pattern(&mut self, pattern: &str, callback: MessageCallback) -> Result<bool> {
        if let Some(sub) = self.patterns.get_mut(pattern) {
            sub.callbacks.push(callback);
            return Ok(false);
        }
        let compiled = GlobPattern::new(pattern)?;
        self.patterns.insert(
            pattern.to_string(),
            PatternSubscription {
                pattern: compiled,
                callbacks: vec![callback],
            },
        );
        Ok(true)
    }

    pub fn remove_channel(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    pub fn remove_pattern(&mut self, pattern: &str) -> bool {
        self.patterns.remove(pattern).is_some()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.patterns.clear();
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    /// Callbacks registered on exactly `channel`.
    pub fn channel_callbacks(&self, channel: &str) -> Vec<MessageCallback> {
        self.channels.get(channel).cloned().unwrap_or_default()
    }

    /// Callbacks registered on exactly `pattern`.
    pub fn pattern_callbacks(&self, pattern: &str) -> Vec<MessageCallback> {
        self.patterns
            .get(pattern)
            .map(|sub| sub.callbacks.clone())
            .unwrap_or_default()
    }

    /// Every callback a message on `channel` should reach: exact subscribers
    /// plus all pattern subscribers whose pattern matches.
    pub fn matching_callbacks(&self, channel: &str) -> Vec<MessageCallback> {
        let mut callbacks = self.channel_callbacks(channel);
        for sub in self.patterns.values() {
            if sub.pattern.is_match(channel) {
                callbacks.extend(sub.callbacks.iter().cloned());
            }
        }
        callbacks
    }
}

/// Runs callbacks outside of any lock so a callback may publish again.
pub fn deliver(callbacks: &[MessageCallback], channel: &str, message: &str) -> u64 {
    for callback in callbacks {
        callback(channel, message);
    }
    callbacks.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, MessageCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let callback: MessageCallback = Arc::new(move |_: &str, _: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (hits, callback)
    }

    #[test]
    fn test_matching_callbacks() {
        let mut registry = SubscriptionRegistry::new();
        let (hits, callback) = counter();

        assert!(registry.add_channel("news", callback.clone()));
        assert!(!registry.add_channel("news", callback.clone()));
        assert!(registry.add_pattern("ne*", callback.clone()).unwrap());
        assert!(registry.add_pattern("sport?", callback).unwrap());

        let callbacks = registry.matching_callbacks("news");
        assert_eq!(deliver(&callbacks, "news", "hi"), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert_eq!(registry.matching_callbacks("sports").len(), 1);
        assert!(registry.matching_callbacks("weather").is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = SubscriptionRegistry::new();
        let (_, callback) = counter();
        registry.add_channel("a", callback.clone());
        registry.add_pattern("b*", callback).unwrap();

        assert!(registry.remove_channel("a"));
        assert!(!registry.remove_channel("a"));
        assert_eq!(registry.pattern_count(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pattern_callbacks() {
        let mut registry = SubscriptionRegistry::new();
        let (_, callback) = counter();
        registry.add_pattern("room:[1]*", callback.clone()).unwrap();
        registry.add_pattern("room:[1]*", callback).unwrap();

        assert_eq!(registry.pattern_callbacks("room:[1]*").len(), 2);
        assert!(registry.pattern_callbacks("room:*").is_empty());
    }
}
