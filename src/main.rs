use admission_gateway::access_log::TracingSink;
use admission_gateway::clock::SystemClock;
use admission_gateway::config::{Config, LogFormat};
use admission_gateway::functions::builtin_registry;
use admission_gateway::gateway::Gateway;
use admission_gateway::policy_store::PolicyStore;
use admission_gateway::server::Server;
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse();
    init_tracing(&config);

    tracing::info!("Starting admission gateway");
    tracing::info!(
        "Configuration: bind_addr={}, policy_file={}, max_concurrent_backend_calls={}",
        config.bind_addr,
        config.policy_file.display(),
        config.max_concurrent_backend_calls
    );

    let store = PolicyStore::load(&config.policy_file)
        .with_context(|| format!("Failed to load policy from {}", config.policy_file.display()))?;
    let settings = config
        .gateway_settings()
        .context("Invalid gateway configuration")?;

    let gateway = Gateway::new(
        Arc::new(store),
        settings,
        &builtin_registry(),
        Arc::new(TracingSink),
        Arc::new(SystemClock),
    )
    .context("Failed to bind routes to backends")?;

    Server::new(config.bind_addr, Arc::new(gateway))
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "admission_gateway={level},gateway={level},access_log=info,tower_http=info",
            level = config.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
