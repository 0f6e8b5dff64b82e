// MIT License - Copyright (c) 2017 Doug Rathbone
// cgateweb daemon

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cgateweb::events::BridgeEvent;
use cgateweb::settings::RawSettings;
use cgateweb::{Bridge, normalize};

/// Options file the host supervisor writes in managed (add-on) mode.
const MANAGED_OPTIONS_PATH: &str = "/data/options.json";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "cgateweb")]
#[command(about = "Bridge between a Clipsal C-Gate server and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "cgateweb.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Configuration sources
// ---------------------------------------------------------------------------

/// Managed mode: a host supervisor is present and maintains the options
/// file for us.
fn managed_mode() -> bool {
    (std::env::var_os("SUPERVISOR_TOKEN").is_some()
        || std::env::var_os("INGRESS_SESSION").is_some())
        && Path::new(MANAGED_OPTIONS_PATH).exists()
}

fn load_raw_settings(cli: &Cli) -> Result<RawSettings> {
    if managed_mode() {
        info!("managed mode: loading options from {MANAGED_OPTIONS_PATH}");
        let text = std::fs::read_to_string(MANAGED_OPTIONS_PATH)
            .context("Failed to read supervisor options file")?;
        return serde_json::from_str(&text).context("Failed to parse supervisor options file");
    }

    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config file {}", cli.config))?;
    toml::from_str(&text).context("Failed to parse config file")
}

/// Log filter from `LOG_LEVEL` (error/warn/info/debug/trace), default info.
fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let raw = load_raw_settings(&cli)?;
    let settings = normalize(raw).context("Invalid configuration")?;

    let mut bridge = Bridge::new(settings);

    // Surface lifecycle events in the log.
    let mut events = bridge.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BridgeEvent::Ready => info!("bridge is ready"),
                BridgeEvent::NotReady => warn!("bridge is not ready"),
                BridgeEvent::AllCommandLinksDown => warn!("all C-Gate command links are down"),
                other => tracing::debug!("bridge event: {other:?}"),
            }
        }
    });

    // Ctrl-C triggers a clean shutdown.
    let shutdown = bridge.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C, shutting down");
            shutdown.shutdown();
        }
    });

    bridge.run().await?;
    Ok(())
}
