use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::error::StoreError;
use crate::health::HealthChecker;
use crate::middleware::apply_rate_limit_headers;
use crate::rate_limiter::RateLimiter;
use crate::response::{RateLimitResponse, ResetResponse};
use crate::store::KvStore;
use crate::validation::RequestValidator;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Store, limiter and health checker shared by every handler
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub limiter: RateLimiter,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, limiter: RateLimiter) -> Self {
        Self {
            health: HealthChecker::new(store.clone()),
            store,
            limiter,
        }
    }
}

/// Record a request against `key` and report the decision
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Response, StoreError> {
    let key = RequestValidator::validate_key(&key)?;
    let decision = state.limiter.check(&key).await;

    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = (status, Json(RateLimitResponse::from_decision(&key, &decision))).into_response();
    apply_rate_limit_headers(response.headers_mut(), &decision);

    Ok(response)
}

/// Forget everything recorded for `key`
pub async fn delete_rate_limit(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, StoreError> {
    let key = RequestValidator::validate_key(&key)?;
    state.limiter.reset(&key).await?;

    Ok(Json(ResetResponse::reset(&key)))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.health.check_store().await;

    if store.is_healthy() {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready", "store": store })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "store": store })),
        )
    }
}

/// Rate limited demo endpoint
pub async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "pong" }))
}
