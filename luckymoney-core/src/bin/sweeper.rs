//! Lucky money expiry sweeper binary

use anyhow::Context;
use luckymoney_core::{spawn_sweeper, Config, LuckyMoney};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration: file from LUCKYMONEY_CONFIG, else environment
    let config = match std::env::var("LUCKYMONEY_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("Invalid environment configuration")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Starting lucky money sweeper"
    );

    let service = LuckyMoney::open(&config).context("Failed to open store")?;

    if !config.sweeper.enabled {
        tracing::warn!("Sweeper disabled by configuration, exiting");
        return Ok(());
    }

    let handle = spawn_sweeper(service, Duration::from_secs(config.sweeper.interval_secs));

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down lucky money sweeper");
    handle.shutdown().await?;

    Ok(())
}
