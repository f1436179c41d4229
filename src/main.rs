//! Trunkgate health monitor daemon
//!
//! Runs the periodic trunk health probe loop against the configured
//! database. Call admission and lifecycle processing are driven by the
//! embedding API service; this binary keeps trunk health and Active/Error
//! status current for selection.

use anyhow::Context;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trunkgate_core::AppConfig;
use trunkgate_db::{create_pool, PgTrunkRepository};
use trunkgate_providers::build_registry;
use trunkgate_services::HealthMonitor;

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "trunkgate={},trunkgate_services={},trunkgate_db={},trunkgate_providers={},sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Trunkgate v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections))
        .await
        .context("Failed to create database pool")?;

    let trunk_repo = Arc::new(PgTrunkRepository::new(pool));
    let providers = Arc::new(build_registry(&config.providers).context("Failed to build provider registry")?);

    info!(
        "Provider registry ready with {} client(s); probing every {}s (threshold {})",
        providers.len(),
        config.health.check_interval_secs,
        config.health.failure_threshold
    );

    let monitor = Arc::new(HealthMonitor::new(
        trunk_repo,
        providers,
        config.health.clone(),
    ));
    let monitor_task = monitor.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping health monitor");
    monitor_task.abort();

    Ok(())
}
