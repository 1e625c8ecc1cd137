//! Main application entry point for the Meridian game server.
//!
//! Wires together CLI parsing, configuration loading, logging setup,
//! signal handling and the server lifecycle.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use game_server::GameServer;
use tokio::time::{timeout, Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod config;
mod signals;

use cli::Args;
use config::LoggingSettings;

/// Initialize the logging system from configuration.
fn setup_logging(logging: &LoggingSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json_format {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut app_config = config::load_config(&args.config).await?;
    app_config.apply_overrides(&args)?;
    setup_logging(&app_config.logging)?;

    info!("Configuration loaded from {}", args.config.display());
    let server_config = app_config.to_server_config();
    let graceful_ms = server_config.graceful_shutdown_ms;
    let server = Arc::new(GameServer::new(server_config));

    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Server error: {}", e);
            }
        })
    };

    info!("Server started. Press Ctrl+C to stop.");
    let signal_name = signals::shutdown_signal().await;
    info!(signal = signal_name, "Termination signal received, draining");

    server.shutdown();
    // The drain has its own internal deadline; this outer one only
    // guards against the runner wedging entirely.
    if timeout(Duration::from_millis(graceful_ms * 2), runner)
        .await
        .is_err()
    {
        error!("Server did not stop within the deadline, exiting anyway");
    }

    info!("Shutdown complete");
    Ok(())
}
