//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Binary entrypoint for the serial collector gateway."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ezmb_common::{
    device_uid, init_tracing, shutdown_signal, BaudRate, BusAddresses, DataBits, LineConfig,
    LoggingConfig, Parity, PortConfig, PortConfigFile, StopBits, DEFAULT_MAXLEN,
    DEFAULT_TIMEOUT_MS,
};
use tracing::info;

mod gateway;

use gateway::SerialGateway;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "ezmb serial collector gateway",
    long_about = "Bridges serial ports to the ezmb bus. Each port gets an endpoint whose id is the port uid: \
                  bytes read from the port are published under `{uid}_north_topic`, payloads received on \
                  `{uid}_south_topic` are written to the port."
)]
struct Cli {
    #[arg(short = 'C', long, value_name = "FILE", help = "JSON port descriptor file", conflicts_with = "device")]
    config: Option<PathBuf>,

    #[arg(short = 'u', long, help = "Port uid (defaults to the device name)")]
    uid: Option<String>,

    #[arg(short = 'D', long, value_name = "PATH", help = "Serial device path")]
    device: Option<PathBuf>,

    #[arg(short = 'b', long, default_value_t = 115_200, help = "Baud rate")]
    baud: u32,

    #[arg(short = 'd', long, default_value_t = 8, help = "Data bits (5-8)")]
    databits: u8,

    #[arg(short = 's', long, default_value_t = 1, help = "Stop bits (1-2)")]
    stopbits: u8,

    #[arg(short = 'p', long, default_value = "none", help = "Parity (none, even, odd)")]
    parity: String,

    #[arg(short = 'm', long, default_value_t = 0, help = "Minimum delay between writes, ms")]
    mindelay: u64,

    #[arg(short = 'l', long, default_value_t = DEFAULT_MAXLEN, help = "Read buffer size, bytes")]
    maxlen: usize,

    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT_MS, help = "Read timeout, ms")]
    timeout: u64,

    #[command(flatten)]
    bus: BusAddresses,

    #[command(flatten)]
    logging: LoggingConfig,
}

impl Cli {
    /// Port descriptors from `--config` or from the single-port flags.
    fn port_configs(&self) -> Result<Vec<PortConfig>> {
        if let Some(path) = &self.config {
            let file = PortConfigFile::load(path)
                .with_context(|| format!("failed to load port descriptors from {}", path.display()))?;
            if file.skipped > 0 {
                info!(skipped = file.skipped, "entries without a device were ignored");
            }
            if file.ports.is_empty() {
                bail!("{} declares no usable ports", path.display());
            }
            return Ok(file.ports);
        }

        let Some(device) = &self.device else {
            bail!("either --config or --device is required");
        };
        let line = LineConfig {
            baud: BaudRate::new(self.baud)?,
            databits: DataBits::try_from(self.databits)?,
            stopbits: StopBits::try_from(self.stopbits)?,
            parity: self.parity.parse::<Parity>()?,
        };
        let uid = self.uid.clone().unwrap_or_else(|| device_uid(device));
        let mut port = PortConfig::new(uid, device.clone())
            .with_line(line)
            .with_maxlen(self.maxlen)
            .with_mindelay(self.mindelay);
        port.timeout = self.timeout;
        port.validate()?;
        Ok(vec![port])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("ezmb-serial-gw", &cli.logging)?;

    let ports = cli.port_configs()?;
    let gateway = SerialGateway::start(ports, &cli.bus)?;
    info!(
        ports = gateway.port_count(),
        north = %cli.bus.north,
        south = %cli.bus.south,
        "serial gateway running; waiting for termination signal"
    );

    shutdown_signal().await;
    tokio::task::spawn_blocking(move || gateway.shutdown())
        .await
        .context("gateway shutdown task failed")?;
    Ok(())
}
