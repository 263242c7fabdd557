//! # courier
//!
//! Courier server binary: loads settings, initializes logging and metrics,
//! and serves the delivery engine until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use courier_core::logging::LogFormat;
use courier_server::{CourierServer, InMemoryMessageStore, PassthroughResolver, ServerConfig};
use courier_settings::CourierSettings;

/// How long background tasks get to stop after the listener has drained.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time fan-out delivery server.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Real-time fan-out delivery server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.courier/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<CourierSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(courier_settings::settings_path);
        courier_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    /// Server config from settings with command-line overrides applied.
    fn server_config(&self, settings: &CourierSettings) -> ServerConfig {
        let mut config = ServerConfig::from(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }

    fn log_level<'a>(&'a self, settings: &'a CourierSettings) -> &'a str {
        self.log_level.as_deref().unwrap_or(&settings.logging.level)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    let format = LogFormat::from_json_flag(settings.logging.json);
    courier_core::logging::init_subscriber(cli.log_level(&settings), format);

    let metrics = courier_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = cli.server_config(&settings);
    let server = CourierServer::new(
        config,
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(PassthroughResolver),
        Some(metrics),
    )
    .context("Failed to build server")?;

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Courier listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(DRAIN_TIMEOUT))
        .await;
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
