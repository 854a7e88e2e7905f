use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Result, StoreError};

/// Rate limit algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter that resets when its window elapses
    Fixed,
    /// Trailing window over individual request timestamps
    Sliding,
}

/// Configuration for one rate limiter
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    #[validate(range(min = 1, message = "window must be at least 1ms"))]
    pub window_ms: u64,
    #[validate(range(min = 1, message = "max_requests must be greater than 0"))]
    pub max_requests: u64,
    pub algorithm: Algorithm,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            algorithm: Algorithm::Sliding,
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u64, window_ms: u64, algorithm: Algorithm) -> Self {
        Self {
            window_ms,
            max_requests,
            algorithm,
        }
    }

    pub fn fixed(max_requests: u64, window_ms: u64) -> Self {
        Self::new(max_requests, window_ms, Algorithm::Fixed)
    }

    pub fn sliding(max_requests: u64, window_ms: u64) -> Self {
        Self::new(max_requests, window_ms, Algorithm::Sliding)
    }

    /// Validate rule parameters
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| StoreError::Configuration(e.to_string()))
    }
}
