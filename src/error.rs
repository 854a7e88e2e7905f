use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        limit: u64,
        retry_after_ms: u64,
        reset_at_ms: u64,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Value is not an integer or out of range")]
    NotAnInteger,

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// True for failures that mean the backend could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_store_error(err: &StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => Self::new("service_unavailable", msg, 503),
            StoreError::Configuration(msg) => Self::new("configuration_error", msg, 500),
            StoreError::UnsupportedOperation(msg) => Self::new("unsupported_operation", msg, 500),
            StoreError::RateLimitExceeded { .. } => {
                Self::new("rate_limit_exceeded", "Request rate limit exceeded", 429)
            }
            StoreError::InvalidArgument(msg) => Self::new("bad_request", msg, 400),
            StoreError::NotAnInteger => Self::new("validation_error", &err.to_string(), 422),
            StoreError::Command(msg) => Self::new("command_error", msg, 500),
            StoreError::Internal(msg) => Self::new("internal_error", msg, 500),
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_store_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(body)).into_response();

        if let StoreError::RateLimitExceeded { retry_after_ms, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_ms.div_ceil(1000).to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}
