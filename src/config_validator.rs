use crate::config::{Config, StoreBackend, StoreConfig};
use crate::error::StoreError;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), StoreError> {
        if url.is_empty() {
            return Err(StoreError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(StoreError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a bind address
    pub fn validate_bind_address(address: &str) -> Result<(), StoreError> {
        if address.is_empty() {
            return Err(StoreError::Configuration(
                "Bind address cannot be empty".to_string(),
            ));
        }

        if !address.contains(':') {
            return Err(StoreError::Configuration(
                "Bind address must be in host:port format".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates rate limit parameters
    pub fn validate_rate_limit(max_requests: u64, window_ms: u64) -> Result<(), StoreError> {
        if max_requests == 0 {
            return Err(StoreError::Configuration(
                "Rate limit max requests must be greater than 0".to_string(),
            ));
        }

        if window_ms == 0 {
            return Err(StoreError::Configuration(
                "Rate limit window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates store settings before the store is built
    pub fn validate_store_config(config: &StoreConfig) -> Result<(), StoreError> {
        if config.backend == StoreBackend::Redis {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                StoreError::Configuration("redis backend selected but REDIS_URL is not set".into())
            })?;
            Self::validate_redis_url(url)?;
        }

        if config.sweep_interval_ms == 0 {
            return Err(StoreError::Configuration(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the full service configuration
    pub fn validate_config(config: &Config) -> Result<(), StoreError> {
        Self::validate_bind_address(&config.bind_addr.to_string())?;
        Self::validate_store_config(&config.store_config())?;
        Self::validate_rate_limit(config.rate_limit_max_requests, config.rate_limit_window_ms)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("").is_err());
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());
    }

    #[test]
    fn test_valid_bind_address() {
        assert!(ConfigValidator::validate_bind_address("127.0.0.1:8080").is_ok());
        assert!(ConfigValidator::validate_bind_address("0.0.0.0:3000").is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(ConfigValidator::validate_bind_address("").is_err());
        assert!(ConfigValidator::validate_bind_address("localhost").is_err());
    }

    #[test]
    fn test_invalid_rate_limit() {
        assert!(ConfigValidator::validate_rate_limit(100, 60_000).is_ok());
        assert!(ConfigValidator::validate_rate_limit(0, 60_000).is_err());
        assert!(ConfigValidator::validate_rate_limit(100, 0).is_err());
    }

    #[test]
    fn test_store_config() {
        assert!(ConfigValidator::validate_store_config(&StoreConfig::memory()).is_ok());
        assert!(ConfigValidator::validate_store_config(&StoreConfig::redis("redis://h:1")).is_ok());
        assert!(ConfigValidator::validate_store_config(&StoreConfig::redis("tcp://h:1")).is_err());

        let mut config = StoreConfig::redis("redis://h:1");
        config.redis_url = None;
        assert!(ConfigValidator::validate_store_config(&config).is_err());
    }
}
