//! famloc agent - headless family location agent for Linux laptops and servers
//!
//! This binary provides a small agent that can:
//! - Store device identity and encrypted credentials locally
//! - Authenticate against the family backend (with second factor)
//! - Locate the device via GeoClue or IP geolocation
//! - Post the location periodically until stopped (for systemd integration)

mod daemon;
mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use famloc_core::config::{ENV_CONFIG_PATH, ENV_ENDPOINT, endpoint_override};
use famloc_core::{ConfigStore, LocationChain};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "famloc-agent")]
#[command(author = "Layer 8 Ecosystem")]
#[command(version)]
#[command(about = "Headless family location agent")]
#[command(long_about = "
famloc-agent reports this device's location to your family backend so it
shows up on the family map. It is designed for laptops and headless Linux
machines where the mobile app isn't available.

Quick start:
  1. Configure:       famloc-agent configure
  2. Check location:  famloc-agent locate
  3. Start posting:   famloc-agent run

For systemd integration, run 'famloc-agent run' as a user service.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Path to the config file (overrides FAMLOC_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enter device name, backend URL, paths and credentials
    #[command(alias = "setup")]
    Configure {
        /// Re-enter every setting (the device id is kept)
        #[arg(long)]
        reset: bool,
    },

    /// Authenticate, register and post the location until stopped
    Run {
        /// Seconds between location posts
        #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },

    /// Locate this device once and print the result
    Locate,

    /// Show configuration status
    Status,

    /// Forget the stored credentials
    #[command(alias = "logout")]
    Disconnect,

    /// Show configuration paths and environment variables
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("famloc={},famloc_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let store = open_store(&cli)?;

    match cli.command {
        Commands::Configure { reset } => cmd_configure(&cli, &store, reset),
        Commands::Run { interval } => daemon::run_agent(&cli, &store, interval).await,
        Commands::Locate => cmd_locate(&cli).await,
        Commands::Status => cmd_status(&cli, &store),
        Commands::Disconnect => cmd_disconnect(&cli, &store),
        Commands::Config => cmd_config(&cli, &store),
    }
}

fn open_store(cli: &Cli) -> Result<ConfigStore> {
    match &cli.config {
        Some(path) => Ok(ConfigStore::new(path)),
        None => ConfigStore::at_default_location().context("Failed to locate config file"),
    }
}

fn cmd_configure(cli: &Cli, store: &ConfigStore, reset: bool) -> Result<()> {
    let mut config = store.load().context("Failed to load configuration")?;

    let changed = prompt::configure(&mut config, reset)?;
    if changed || !store.exists() {
        store.save(&config).context("Failed to save configuration")?;
    }

    match cli.format {
        OutputFormat::Text => {
            if changed {
                println!("Configuration saved to {}", store.path().display());
            } else {
                println!("Already configured. Use --reset to change settings.");
            }
            println!("Device: {} ({})", config.device_name, config.device_id);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": if changed { "saved" } else { "unchanged" },
                "config_file": store.path(),
                "device_id": config.device_id,
                "device_name": config.device_name,
            }));
        }
    }

    Ok(())
}

async fn cmd_locate(cli: &Cli) -> Result<()> {
    let chain = LocationChain::system_default().context("Failed to set up location sources")?;

    match cli.format {
        OutputFormat::Text => println!("Locating via {}...", chain.source_names().join(", ")),
        OutputFormat::Json => {}
    }

    match chain.acquire().await {
        Ok(fix) => match cli.format {
            OutputFormat::Text => {
                println!("Latitude:  {:.6}", fix.coordinates.latitude);
                println!("Longitude: {:.6}", fix.coordinates.longitude);
                println!("Source:    {}", fix.source);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({
                    "latitude": fix.coordinates.latitude,
                    "longitude": fix.coordinates.longitude,
                    "source": fix.source,
                }));
            }
        },
        Err(e) => match cli.format {
            OutputFormat::Text => anyhow::bail!("{}", e),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({
                    "error": e.to_string(),
                }));
            }
        },
    }

    Ok(())
}

fn cmd_status(cli: &Cli, store: &ConfigStore) -> Result<()> {
    let config = store.load().context("Failed to load configuration")?;
    let missing = config.missing_fields();
    let has_credentials = config.credentials.is_complete();

    match cli.format {
        OutputFormat::Text => {
            if !store.exists() {
                println!("Status: Not configured");
                println!();
                println!("Run 'famloc-agent configure' to set up this device.");
                return Ok(());
            }

            println!("Status:    {}", if missing.is_empty() { "Configured" } else { "Incomplete" });
            println!("Device:    {} ({})", or_dash(&config.device_name), config.device_id);
            println!("Endpoint:  {}", or_dash(&config.endpoint));
            println!("Registry:  {}", or_dash(&config.registry_path));
            println!("Location:  {}", or_dash(&config.location_path));
            println!(
                "Account:   {}",
                if has_credentials { config.credentials.username.as_str() } else { "-" }
            );
            if config.skip_tls_verify() {
                println!("TLS:       verification disabled");
            }
            if !missing.is_empty() {
                println!();
                println!("Missing: {}", missing.join(", "));
                println!("Run 'famloc-agent configure' to complete the setup.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "configured": store.exists() && missing.is_empty(),
                "config_file": store.path(),
                "device_id": config.device_id,
                "device_name": config.device_name,
                "endpoint": config.endpoint,
                "registry_path": config.registry_path,
                "location_path": config.location_path,
                "skip_tls_verify": config.skip_tls_verify,
                "has_credentials": has_credentials,
                "missing": missing,
            }));
        }
    }

    Ok(())
}

fn cmd_disconnect(cli: &Cli, store: &ConfigStore) -> Result<()> {
    let config = store.load().context("Failed to load configuration")?;

    if !store.exists() || !config.credentials.is_complete() {
        match cli.format {
            OutputFormat::Text => println!("No credentials stored."),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({
                    "status": "not_connected",
                }));
            }
        }
        return Ok(());
    }

    store.clear_credentials().context("Failed to clear credentials")?;

    match cli.format {
        OutputFormat::Text => {
            println!("Credentials for '{}' removed", config.credentials.username);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "disconnected",
                "username": config.credentials.username,
            }));
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, store: &ConfigStore) -> Result<()> {
    let endpoint = endpoint_override();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", store.path().display());
            println!("Exists:           {}", if store.exists() { "yes" } else { "no" });
            if let Some(url) = &endpoint {
                println!("Endpoint:         {} (from {})", url, ENV_ENDPOINT);
            }
            println!();
            println!("Environment variables:");
            println!("  {:<16} - Override config file path", ENV_CONFIG_PATH);
            println!("  {:<16} - Override backend URL (not saved)", ENV_ENDPOINT);
            println!("  RUST_LOG         - Override log filter");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": store.path(),
                "exists": store.exists(),
                "endpoint_override": endpoint,
            }));
        }
    }

    Ok(())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
