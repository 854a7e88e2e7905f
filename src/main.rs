use anyhow::Result;
use kvthrottle::config::Config;
use kvthrottle::config_validator::ConfigValidator;
use kvthrottle::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse_args();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("kvthrottle={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ConfigValidator::validate_config(&config)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("Starting kvthrottle service");
    tracing::info!(
        "Configuration: bind_addr={}, store_backend={:?}, rate_limit={}/{}ms ({:?})",
        config.bind_addr,
        config.store_backend,
        config.rate_limit_max_requests,
        config.rate_limit_window_ms,
        config.rate_limit_algorithm
    );

    let server =
        Server::new(config).map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
