//! Key generation utilities for rate limiting.

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Identity of an authenticated caller, inserted into request extensions by
/// whatever authentication layer runs before rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Strategy for generating rate limit keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// `user:<id>` when authenticated, otherwise `ip:<address>`
    #[default]
    UserOrIp,
    /// Always `ip:<address>`
    IpAddress,
}

/// Generates rate limiting keys based on request context
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    strategy: KeyStrategy,
}

impl KeyGenerator {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Generate a rate limit key from the caller's identity and address
    pub fn generate_key(&self, user_id: Option<&str>, client_ip: &str) -> String {
        match (self.strategy, user_id) {
            (KeyStrategy::UserOrIp, Some(id)) if !id.is_empty() => format!("user:{}", id),
            _ => format!("ip:{}", client_ip),
        }
    }

    pub fn key_for_request(&self, request: &Request) -> String {
        let user = request.extensions().get::<AuthenticatedUser>();
        self.generate_key(
            user.map(|u| u.id.as_str()),
            &Self::extract_client_ip(request),
        )
    }

    /// Extract client IP from proxy headers, falling back to the socket address
    pub fn extract_client_ip(request: &Request) -> String {
        let headers = request.headers();

        if let Some(first_ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return first_ip.to_string();
        }

        if let Some(real_ip) = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return real_ip.to_string();
        }

        let extensions = request.extensions();
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .or_else(|| extensions.get::<SocketAddr>().map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}
