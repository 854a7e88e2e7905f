use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::store::{KvStore, SetOptions};

/// Reserved key written and read back by the readiness probe
pub const PROBE_KEY: &str = "__kvthrottle:health_probe__";
const PROBE_TTL_SECS: u64 = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub backend: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl ServiceStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn KvStore>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        std::sync::LazyLock::force(&START_TIME);
        Self { store }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = self.check_store().await;

        let overall_status = if store_status.is_healthy() {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                store: store_status,
            },
        }
    }

    /// Readiness probe: connected, then a short-lived write read back intact
    pub async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.probe().await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        let backend = self.store.backend_name().to_string();

        match result {
            Ok(()) => ServiceStatus {
                status: "healthy".to_string(),
                backend,
                response_time_ms,
                error: None,
            },
            Err(e) => {
                warn!(backend = %backend, error = %e, "Store readiness probe failed");
                ServiceStatus {
                    status: "unavailable".to_string(),
                    backend,
                    response_time_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn probe(&self) -> Result<()> {
        if !self.store.is_connected() {
            return Err(StoreError::Connection("store is not connected".to_string()));
        }

        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .set(PROBE_KEY, &token, SetOptions::ex(PROBE_TTL_SECS))
            .await?;

        match self.store.get(PROBE_KEY).await? {
            Some(read_back) if read_back == token => Ok(()),
            _ => Err(StoreError::Internal(
                "probe value did not read back".to_string(),
            )),
        }
    }
}
