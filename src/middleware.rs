use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::algorithms::RateLimitDecision;
use crate::error::StoreError;
use crate::key_generator::KeyGenerator;
use crate::rate_limiter::RateLimiter;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// State for [`rate_limit_middleware`]
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: RateLimiter,
    pub keys: KeyGenerator,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            keys: KeyGenerator::default(),
        }
    }

    pub fn with_keys(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = KeyGenerator::extract_client_ip(&request);

    info!(
        target: "kvthrottle::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "kvthrottle::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Admits or rejects a request before it reaches the handler.
///
/// Allowed requests get `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
/// Rejected requests get status 429 plus `Retry-After` (seconds, rounded up)
/// and `X-RateLimit-Reset` (epoch seconds).
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let key = state.keys.key_for_request(&request);

    match state.limiter.enforce(&key).await {
        Ok(decision) => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Err(StoreError::RateLimitExceeded {
            limit,
            retry_after_ms,
            reset_at_ms,
        }) => {
            warn!(
                target: "kvthrottle::middleware",
                key = %key,
                retry_after_ms,
                "Rate limit exceeded"
            );
            let decision = RateLimitDecision::denied(limit, limit, reset_at_ms, retry_after_ms);
            let mut response = StoreError::RateLimitExceeded {
                limit,
                retry_after_ms,
                reset_at_ms,
            }
            .into_response();
            apply_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Err(other) => other.into_response(),
    }
}

/// Writes the rate limit headers for `decision` into `headers`
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));

    if !decision.allowed {
        if let Some(secs) = decision.retry_after_secs() {
            headers.insert(HEADER_RETRY_AFTER, HeaderValue::from(secs));
        }
        headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_epoch_secs()));
    }
}
