use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::rate_limit_config::{Algorithm, RateLimitConfig};
use crate::store::redis::RedisOptions;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_MAX_REQUESTS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// In-process, volatile store
    Memory,
    /// Remote Redis server
    Redis,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "kvthrottle", version, about = "Store-backed rate limiting service")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: SocketAddr,

    /// Which store backend to use
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "memory")]
    pub store_backend: StoreBackend,

    /// Redis connection URL, required for the redis backend
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Prefix applied to every key written to Redis
    #[arg(long, env = "KEY_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// Connection attempts before giving up
    #[arg(long, env = "REDIS_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub redis_max_retries: u32,

    /// Upper bound on the delay between connection attempts
    #[arg(long, env = "REDIS_MAX_RETRY_DELAY_MS", default_value_t = DEFAULT_MAX_RETRY_DELAY_MS)]
    pub redis_max_retry_delay_ms: u64,

    /// Interval of the embedded store's expiry sweep
    #[arg(long, env = "SWEEP_INTERVAL_MS", default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    pub sweep_interval_ms: u64,

    /// Rate limit window length
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = DEFAULT_WINDOW_MS)]
    pub rate_limit_window_ms: u64,

    /// Requests admitted per window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = DEFAULT_MAX_REQUESTS)]
    pub rate_limit_max_requests: u64,

    /// Rate limiting algorithm
    #[arg(long, env = "RATE_LIMIT_ALGORITHM", value_enum, default_value = "sliding")]
    pub rate_limit_algorithm: Algorithm,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables only
    pub fn from_env() -> std::result::Result<Self, clap::Error> {
        Config::try_parse_from(["kvthrottle"])
    }

    /// Parse command line flags, falling back to environment variables
    pub fn parse_args() -> Self {
        Config::parse()
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            backend: self.store_backend,
            redis_url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
            max_retries: self.redis_max_retries,
            max_retry_delay_ms: self.redis_max_retry_delay_ms,
            sweep_interval_ms: self.sweep_interval_ms,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            window_ms: self.rate_limit_window_ms,
            max_requests: self.rate_limit_max_requests,
            algorithm: self.rate_limit_algorithm,
        }
    }
}

/// Built-in defaults, independent of flags and the process environment.
impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            store_backend: StoreBackend::Memory,
            redis_url: None,
            key_prefix: String::new(),
            redis_max_retries: DEFAULT_MAX_RETRIES,
            redis_max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            rate_limit_window_ms: DEFAULT_WINDOW_MS,
            rate_limit_max_requests: DEFAULT_MAX_REQUESTS,
            rate_limit_algorithm: Algorithm::Sliding,
            log_level: "info".to_string(),
        }
    }
}

/// Everything needed to build a store with [`crate::store::create_store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub max_retries: u32,
    pub max_retry_delay_ms: u64,
    pub sweep_interval_ms: u64,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            key_prefix: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }

    pub fn redis(url: &str) -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: Some(url.to_string()),
            ..Self::memory()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn redis_options(&self) -> Result<RedisOptions> {
        let url = self
            .redis_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                StoreError::Configuration("redis backend selected but REDIS_URL is not set".into())
            })?;

        Ok(RedisOptions {
            url: url.to_string(),
            key_prefix: self.key_prefix.clone(),
            max_retries: self.max_retries,
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.rate_limit_window_ms, 60_000);
        assert_eq!(config.rate_limit_algorithm, Algorithm::Sliding);
        assert_eq!(config.store_config().sweep_interval(), Duration::from_secs(1));
        assert!(config.rate_limit_config().check().is_ok());
    }

    #[test]
    fn test_cli_flags() {
        let config = Config::try_parse_from([
            "kvthrottle",
            "--store-backend",
            "redis",
            "--redis-url",
            "redis://localhost:6379",
            "--key-prefix",
            "app:",
            "--rate-limit-algorithm",
            "fixed",
        ])
        .unwrap();
        assert_eq!(config.store_backend, StoreBackend::Redis);
        assert_eq!(config.rate_limit_config().algorithm, Algorithm::Fixed);

        let options = config.store_config().redis_options().unwrap();
        assert_eq!(options.key_prefix, "app:");
        assert_eq!(options.max_retry_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_redis_without_url_is_configuration_error() {
        let mut config = StoreConfig::redis("");
        assert!(matches!(
            config.redis_options(),
            Err(StoreError::Configuration(_))
        ));
        config.redis_url = None;
        assert!(config.redis_options().is_err());
    }
}
