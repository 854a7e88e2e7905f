//! Shell-style key patterns shared by both store backends.
//!
//! Only `*` (any run of characters, including none) and `?` (exactly one
//! character) are special. Everything else matches literally, so a pattern
//! like `user.[1]` matches only the key `user.[1]`.

use regex::Regex;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push_str("^(?s:");

        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if ch == '*' { ".*" } else { "." });
                }
                _ => literal.push(ch),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push_str(")$");

        let regex = Regex::new(&expr).map_err(|e| {
            StoreError::InvalidArgument(format!("Invalid pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The same pattern expressed in Redis glob syntax, with the characters
    /// Redis treats specially (`[`, `]`, `\`) escaped.
    pub fn to_redis_glob(&self) -> String {
        escape_redis_glob(&self.source, false)
    }
}

/// Escapes a string for use inside a Redis glob. When `literal_wildcards` is
/// set, `*` and `?` are escaped too so the whole input matches verbatim.
pub fn escape_redis_glob(input: &str, literal_wildcards: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let special = matches!(ch, '[' | ']' | '\\') || (literal_wildcards && matches!(ch, '*' | '?'));
        if special {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_star() {
        let pattern = GlobPattern::new("user:*").unwrap();
        assert!(pattern.is_match("user:1"));
        assert!(pattern.is_match("user:abc"));
        assert!(pattern.is_match("user:"));
        assert!(!pattern.is_match("users:1"));
        assert!(!pattern.is_match("xuser:1"));
    }

    #[test]
    fn test_question_mark() {
        let pattern = GlobPattern::new("h?llo").unwrap();
        assert!(pattern.is_match("hello"));
        assert!(pattern.is_match("hallo"));
        assert!(!pattern.is_match("hllo"));
        assert!(!pattern.is_match("heello"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = GlobPattern::new("a.b+(c)[d]").unwrap();
        assert!(pattern.is_match("a.b+(c)[d]"));
        assert!(!pattern.is_match("axb+(c)[d]"));
        assert!(!pattern.is_match("a.bb(c)d"));

        let pattern = GlobPattern::new("$^|{1}").unwrap();
        assert!(pattern.is_match("$^|{1}"));
    }

    #[test]
    fn test_anchored_and_multiline() {
        let pattern = GlobPattern::new("*end").unwrap();
        assert!(pattern.is_match("line\nend"));
        assert!(!pattern.is_match("endless"));
    }

    #[test]
    fn test_redis_glob_translation() {
        let pattern = GlobPattern::new("room:[a]*").unwrap();
        assert_eq!(pattern.to_redis_glob(), "room:\\[a\\]*");
        assert_eq!(escape_redis_glob("app:*", true), "app:\\*");
    }
}
