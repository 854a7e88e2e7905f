use serde::Serialize;

use crate::algorithms::RateLimitDecision;

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub key: String,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds at which the window frees up
    pub reset_time: u64,
    /// Seconds to wait before retrying, present only on denial
    pub retry_after: Option<u64>,
}

impl RateLimitResponse {
    pub fn from_decision(key: &str, decision: &RateLimitDecision) -> Self {
        Self {
            key: key.to_string(),
            allowed: decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_time: decision.reset_epoch_secs(),
            retry_after: decision.retry_after_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: String,
    pub message: String,
    pub key: String,
}

impl ResetResponse {
    pub fn reset(key: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: "Rate limit state cleared".to_string(),
            key: key.to_string(),
        }
    }
}
