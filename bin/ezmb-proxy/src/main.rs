//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Binary entrypoint for the bus relay."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ezmb_bus::{Frame, FrameObserver, Relay};
use ezmb_common::{init_tracing, shutdown_signal, BusAddresses, LoggingConfig};
use ezmb_logging::hex_dump;
use tracing::{debug, enabled, info, Level};

#[derive(Debug, Parser)]
#[command(author, version, about = "ezmb bus relay", long_about = None)]
struct Cli {
    #[command(flatten)]
    bus: BusAddresses,

    #[arg(long, help = "Log every forwarded frame at debug level")]
    trace_frames: bool,

    #[command(flatten)]
    logging: LoggingConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("ezmb-proxy", &cli.logging)?;

    let observer: Option<FrameObserver> = cli.trace_frames.then(|| {
        Arc::new(|frame: &Frame| {
            debug!(
                topic = %frame.topic_str(),
                bytes = frame.payload.len(),
                "frame forwarded"
            );
            if enabled!(Level::TRACE) {
                tracing::trace!("\n{}", hex_dump(&frame.payload));
            }
        }) as FrameObserver
    });

    let mut relay = Relay::create(&cli.bus.north, &cli.bus.south, observer)
        .with_context(|| format!("failed to bind relay {} -> {}", cli.bus.north, cli.bus.south))?;
    relay.listen().context("failed to start relay")?;
    info!(north = %relay.north_url(), south = %relay.south_url(), "relay running; waiting for termination signal");

    shutdown_signal().await;

    let stats = relay.stats();
    tokio::task::spawn_blocking(move || relay.stop())
        .await
        .context("relay shutdown task failed")?;
    info!(
        forwarded = stats.forwarded(),
        control = stats.control(),
        malformed = stats.malformed(),
        "relay stopped"
    );
    Ok(())
}
