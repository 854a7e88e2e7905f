use crate::error::{Result, StoreError};

/// Longest limiter key accepted over HTTP
pub const MAX_KEY_LENGTH: usize = 256;

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Validates a limiter key taken from the request path and returns it trimmed
    pub fn validate_key(key: &str) -> Result<String> {
        let key = key.trim();

        if key.is_empty() {
            return Err(StoreError::InvalidArgument(
                "Rate limit key cannot be empty".to_string(),
            ));
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(StoreError::InvalidArgument(format!(
                "Rate limit key cannot be longer than {} bytes",
                MAX_KEY_LENGTH
            )));
        }

        // `user:42`, `ip:10.0.0.1`, `ip:::1`, `api-key_1`, `me@example.com`
        if !key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '@'))
        {
            return Err(StoreError::InvalidArgument(
                "Rate limit key can only contain alphanumeric characters and - _ : . @".to_string(),
            ));
        }

        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        for key in ["api-key", "user:42", "ip:10.0.0.1", "ip:::1", "me@example.com"] {
            assert_eq!(RequestValidator::validate_key(key).unwrap(), key);
        }
        assert_eq!(RequestValidator::validate_key("  padded ").unwrap(), "padded");
    }

    #[test]
    fn test_invalid_key_format() {
        assert!(RequestValidator::validate_key("invalid key!").is_err());
        assert!(RequestValidator::validate_key("glob*").is_err());
        assert!(RequestValidator::validate_key("   ").is_err());
    }

    #[test]
    fn test_key_too_long() {
        let key = "a".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            RequestValidator::validate_key(&key),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
