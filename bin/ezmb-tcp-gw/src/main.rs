//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Binary entrypoint for the TCP actuator gateway."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ezmb_bus::Endpoint;
use ezmb_common::{init_tracing, shutdown_signal, BusAddresses, LoggingConfig};
use ezmb_plugin::{Passthrough, Transform};
use ezmb_rt::FrameQueue;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

mod context;
mod server;

use context::{spawn_worker, stage_from_bus, GatewayContext};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "ezmb TCP actuator gateway",
    long_about = "Accepts TCP clients and bridges them to one bus endpoint. Client bytes pass through the \
                  plugin's south transform and are published under `{uid}_north_topic`; frames received on \
                  `{uid}_south_topic` pass through the north transform and are sent to every client."
)]
struct Cli {
    #[arg(short = 'u', long, help = "Endpoint uid")]
    uid: String,

    #[arg(long, default_value = "0.0.0.0:9995", help = "TCP listen address")]
    listen: SocketAddr,

    #[arg(long, value_name = "FILE", help = "Transform plugin (shared object or Lua script)")]
    plugin: Option<PathBuf>,

    #[arg(long, default_value_t = 1024, help = "Staged payloads held before new ones are dropped")]
    queue_capacity: usize,

    #[arg(long, default_value_t = 256, help = "Payloads buffered per client before it is considered lagging")]
    fanout_capacity: usize,

    #[command(flatten)]
    bus: BusAddresses,

    #[command(flatten)]
    logging: LoggingConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("ezmb-tcp-gw", &cli.logging)?;

    let transform: Box<dyn Transform> = match &cli.plugin {
        Some(path) => ezmb_plugin::load(path)
            .with_context(|| format!("failed to load plugin {}", path.display()))?,
        None => Box::new(Passthrough),
    };

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to listen on {}", cli.listen))?;

    let queue = Arc::new(FrameQueue::bounded(cli.queue_capacity.max(1)));
    let mut endpoint = Endpoint::create(&cli.uid, &cli.bus, Some(stage_from_bus(Arc::clone(&queue))))
        .with_context(|| format!("failed to create endpoint {}", cli.uid))?;
    let (clients, _) = broadcast::channel(cli.fanout_capacity.max(1));
    let ctx = GatewayContext::new(endpoint.handle(), queue, clients);

    let worker = spawn_worker(ctx.clone(), transform).context("failed to spawn transform worker")?;
    endpoint.listen().context("failed to start endpoint")?;
    info!(
        uid = %cli.uid,
        listen = %cli.listen,
        north = %cli.bus.north,
        south = %cli.bus.south,
        "tcp gateway running; waiting for termination signal"
    );

    server::serve(listener, ctx.clone(), shutdown_signal()).await;

    ctx.shutdown();
    tokio::task::spawn_blocking(move || {
        if worker.join().is_err() {
            warn!("transform worker panicked");
        }
        endpoint.stop();
    })
    .await
    .context("gateway shutdown task failed")?;
    info!("tcp gateway stopped");
    Ok(())
}
