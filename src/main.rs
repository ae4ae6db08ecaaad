//! Metrika Server Entry Point
//!
//! Runs the metrics collector: HTTP API plus durable metric storage.
//! Core functionality is provided by the `metrika` library crate.

use clap::Parser;
use metrika::{
    config::AppConfig,
    server::{AppState, create_router},
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Metrika - metrics collection server
#[derive(Parser, Debug)]
#[command(name = "metrika", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "METRIKA_CONFIG")]
    config: Option<String>,

    /// Listen address as host:port (overrides config file)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Snapshot interval in seconds, 0 writes on every update (overrides config file)
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file path (overrides config file)
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<String>,

    /// Load saved metrics on startup (overrides config file)
    #[arg(short, long, env = "RESTORE")]
    restore: Option<bool>,

    /// Database DSN, e.g. sqlite:metrics.db (overrides config file)
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,metrika=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Metrika - metrics collection server");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(address) = cli.address {
        config.server.address = address;
    }
    if let Some(secs) = cli.store_interval {
        config.storage.store_interval = Duration::from_secs(secs);
    }
    if let Some(path) = cli.file_storage_path {
        config.storage.file_storage_path = path;
    }
    if let Some(restore) = cli.restore {
        config.storage.restore = restore;
    }
    if let Some(dsn) = cli.database_dsn {
        config.storage.database_dsn = dsn;
    }
    config.validate()?;

    tracing::info!(
        address = %config.server.address,
        backend = ?config.storage.backend(),
        store_interval = ?config.storage.store_interval,
        restore = config.storage.restore,
        "Configuration loaded"
    );

    // Build storage layer
    let handles = config.storage_builder()?.build().await?;

    // Build Axum router
    let app = create_router(AppState {
        repository: handles.repository.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
    tracing::info!("Web server listening on: http://{}", listener.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(metrika::signal::shutdown_signal())
        .await?;

    // In-flight requests have drained; persist the final state.
    tracing::info!("Shutting down storage...");
    if let Err(e) = handles.shutdown().await {
        tracing::error!("Failed to shutdown storage: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
