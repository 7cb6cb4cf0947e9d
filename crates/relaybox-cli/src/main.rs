/*!
 * RelayBox command line entrypoint.
 *
 * Reads `CONFIG_FILE` and `LOG_LEVEL` from the environment, builds the
 * bridge and runs it until Ctrl-C.
 */
use std::env;

use anyhow::{Context, Result};
use tracing::{error, info};

use relaybox_core::{config::ConfigStore, logging::DEFAULT_LOG_LEVEL};
use relaybox_engine::Orchestrator;

const DEFAULT_CONFIG_FILE: &str = "config.ini";

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    relaybox_core::init(&log_level).context("failed to initialize logging")?;

    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    info!("Starting relaybox {} with {}", env!("CARGO_PKG_VERSION"), config_file);

    let orchestrator = Orchestrator::init(ConfigStore::new(&config_file))
        .with_context(|| format!("failed to start from {}", config_file))?;

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping");
                shutdown.set();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    orchestrator.run().await.context("bridge stopped with an error")?;
    info!("Stopped");
    Ok(())
}
