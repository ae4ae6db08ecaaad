//! Metrika Agent Entry Point
//!
//! Samples system metrics and pushes them to a Metrika server.

use clap::Parser;
use metrika::{agent::Agent, config::AgentConfig};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Metrika agent - system metrics reporter
#[derive(Parser, Debug)]
#[command(name = "metrika-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "METRIKA_AGENT_CONFIG")]
    config: Option<String>,

    /// Server address as host:port (overrides config file)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Poll interval in seconds (overrides config file)
    #[arg(short, long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Report interval in seconds (overrides config file)
    #[arg(short, long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,
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

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AgentConfig::load(path)?
        }
        None => AgentConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(secs) = cli.poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.report_interval {
        config.report_interval = Duration::from_secs(secs);
    }

    let agent = Agent::new(&config)?;
    agent.run().await?;

    tracing::info!("Agent stopped");
    Ok(())
}
