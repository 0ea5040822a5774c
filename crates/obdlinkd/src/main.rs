//! obdlinkd - OBD-II telemetry daemon
//!
//! Connects to a BLE OBD-II adapter, polls speed, RPM, coolant temperature
//! and fuel level, and prints every update to stdout.
//!
//! Usage:
//!   obdlinkd [--config obdlink.toml] [--json]
//!
//! If no config file is provided, the simulated adapter is used.

mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use obd_ble::{LinkConfig, TelemetryLink};
use obd_core::BroadcastSink;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "obdlinkd")]
#[command(author, version, about = "OBD-II BLE telemetry daemon")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "OBDLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Print telemetry as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "obdlinkd=debug,obd_ble=debug"
    } else {
        "obdlinkd=info,obd_ble=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("Starting obdlinkd");

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            LinkConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => {
            tracing::info!("No config file provided, using mock transport");
            LinkConfig::default()
        }
    };

    let sink = Arc::new(BroadcastSink::default());
    let mut updates = sink.subscribe();
    let link = Arc::new(
        TelemetryLink::from_config(config, sink)
            .await
            .context("Failed to create telemetry link")?,
    );

    let json = cli.json;
    let printer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(event) => println!("{}", output::format_event(&event, json)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let runner = {
        let link = link.clone();
        tokio::spawn(async move { link.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    link.shutdown();
    runner.await.context("Telemetry link task failed")??;
    printer.abort();

    Ok(())
}
