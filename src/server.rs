use crate::config::Config;
use crate::error::Result;
use crate::handlers::{
    check_rate_limit, delete_rate_limit, health_check, ping, readiness_check, AppState,
    SharedState,
};
use crate::middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
use crate::rate_limiter::RateLimiter;
use crate::registry;
use crate::store::create_store;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the HTTP application around an already constructed state
pub fn create_app(state: SharedState) -> Router {
    let rate_limit = RateLimitState::new(state.limiter.clone());

    let api = Router::new()
        .route("/api/ping", get(ping))
        .route_layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    Router::new()
        // Rate limiting endpoints
        .route("/rate-limit/:key/check", post(check_rate_limit))
        .route("/rate-limit/:key", delete(delete_rate_limit))
        // Health and readiness endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    state: SharedState,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let store = create_store(&config.store_config())?;
        let limiter = RateLimiter::new(config.rate_limit_config(), Some(store.clone()))?;
        let state = Arc::new(AppState::new(store, limiter));

        Ok(Self { config, state })
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub async fn run(self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let store = self.state.store.clone();
        store.connect().await?;
        registry::set_default(store.clone());

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        info!(
            backend = store.backend_name(),
            algorithm = ?self.config.rate_limit_algorithm,
            "kvthrottle listening on {}",
            self.config.bind_addr
        );
        info!("Health check available at /health");
        info!("Readiness check available at /ready");

        let app = create_app(self.state.clone());
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        registry::clear_default();
        if let Err(e) = store.disconnect().await {
            error!(error = %e, "Failed to disconnect store");
        }

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
