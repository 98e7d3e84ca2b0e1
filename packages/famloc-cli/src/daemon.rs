//! Foreground agent mode for continuous location posting
//!
//! This module:
//! - Completes configuration interactively on first run
//! - Authenticates (with second factor) and registers the device
//! - Posts the location on a fixed interval
//! - Handles graceful shutdown via SIGTERM/SIGINT

use crate::prompt::{self, TerminalPrompt};
use crate::{Cli, OutputFormat};
use anyhow::{Context, Result};
use famloc_core::config::endpoint_override;
use famloc_core::{AgentLoop, ConfigStore, LocationChain};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run the location agent until a shutdown signal arrives
pub async fn run_agent(cli: &Cli, store: &ConfigStore, interval_secs: u64) -> Result<()> {
    let mut config = store.load().context("Failed to load configuration")?;

    if config.needs_configuration() {
        tracing::info!("Configuration incomplete, prompting for missing settings");
        prompt::configure(&mut config, false)?;
        store.save(&config).context("Failed to save configuration")?;
        println!("Configuration saved to {}", store.path().display());
    }

    if let Some(endpoint) = endpoint_override() {
        tracing::info!("Using endpoint from environment: {}", endpoint);
        config.endpoint = endpoint;
    }

    let chain = LocationChain::system_default().context("Failed to set up location sources")?;
    tracing::debug!("Location sources: {}", chain.source_names().join(", "));

    let mut agent =
        AgentLoop::new(&config, chain)?.with_interval(Duration::from_secs(interval_secs));

    if let Err(e) = agent.start(&TerminalPrompt).await {
        tracing::error!("Startup failed: {}", e);
        return Err(e).context("Agent startup failed");
    }

    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone());

    let stats = agent.run(cancel).await;

    match cli.format {
        OutputFormat::Text => {
            println!(
                "Agent stopped: {} cycles, {} posted, {} without location, {} skipped",
                stats.cycles, stats.posted, stats.no_location, stats.skipped
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "stopped",
                "stats": stats,
            }));
        }
    }

    Ok(())
}

/// Cancel `cancel` on SIGTERM or SIGINT
fn setup_signal_handlers(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let on_term = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM");
                    on_term.cancel();
                }
                Err(e) => tracing::error!("Failed to register SIGTERM handler: {}", e),
            }
        });

        tokio::spawn(async move {
            match signal(SignalKind::interrupt()) {
                Ok(mut sigint) => {
                    sigint.recv().await;
                    tracing::info!("Received SIGINT");
                    cancel.cancel();
                }
                Err(e) => tracing::error!("Failed to register SIGINT handler: {}", e),
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C");
                cancel.cancel();
            }
        });
    }
}
