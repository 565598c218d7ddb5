//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Wiring between the port set and per-port bus endpoints."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use ezmb_bus::{Endpoint, EndpointHandle, Frame, FrameHandler};
use ezmb_common::{BusAddresses, PortConfig};
use ezmb_logging::{ezmb_debug, ezmb_warn, hex_dump, LogContext};
use ezmb_rt::SendPacer;
use ezmb_serial::{PortHandler, PortSet, SerialError};
use parking_lot::Mutex;
use tracing::{enabled, info, Level};

/// A running collector: one port set plus one endpoint per port.
pub struct SerialGateway {
    ports: Arc<PortSet>,
    endpoints: Vec<Endpoint>,
}

impl SerialGateway {
    /// Register every port, connect its endpoint and start all workers.
    pub fn start(configs: Vec<PortConfig>, bus: &BusAddresses) -> Result<Self> {
        let ports = Arc::new(PortSet::new());
        let mut endpoints = Vec::with_capacity(configs.len());

        for config in configs {
            let uid = config.uid.clone();
            let pacer = Arc::new(Mutex::new(SendPacer::new(config.min_delay())));
            let mut endpoint = Endpoint::create(&uid, bus, Some(bus_to_port(Arc::clone(&ports), pacer)))
                .with_context(|| format!("failed to create endpoint for port {uid}"))?;
            ports
                .add_port(config, port_to_bus(endpoint.handle()))
                .with_context(|| format!("failed to register port {uid}"))?;
            endpoint
                .listen()
                .with_context(|| format!("failed to start endpoint {uid}"))?;
            endpoints.push(endpoint);
        }

        ports.start().context("failed to start port workers")?;
        for status in ports.statuses() {
            info!(uid = %status.uid, device = %status.device, "port registered");
        }
        Ok(Self { ports, endpoints })
    }

    /// Number of managed ports.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Stop every endpoint and the port workers.
    pub fn shutdown(mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.stop();
        }
        self.ports.stop();
        info!("serial gateway stopped");
    }
}

/// Handler forwarding bytes read from a port to that port's endpoint.
fn port_to_bus(endpoint: EndpointHandle) -> PortHandler {
    Arc::new(move |uid: &str, data: &[u8]| {
        let ctx = LogContext::new()
            .with_uid(uid)
            .with_topic(&endpoint.topics().publish)
            .with_direction("north");
        ezmb_debug!(context = ctx, "serial -> bus, {} bytes", data.len());
        if enabled!(Level::DEBUG) {
            ezmb_debug!(context = ctx, "\n{}", hex_dump(data));
        }
        if let Err(err) = endpoint.send(data) {
            ezmb_warn!(context = ctx, "publish failed: {}", err);
        }
    })
}

/// Handler writing payloads addressed to an endpoint to the port with the same uid.
fn bus_to_port(ports: Arc<PortSet>, pacer: Arc<Mutex<SendPacer>>) -> FrameHandler {
    Arc::new(move |frame: &Frame, endpoint: &EndpointHandle| {
        let ctx = LogContext::new()
            .with_uid(endpoint.id())
            .with_topic(&endpoint.topics().subscribe)
            .with_direction("south");
        ezmb_debug!(context = ctx, "bus -> serial, {} bytes", frame.payload.len());
        if enabled!(Level::DEBUG) {
            ezmb_debug!(context = ctx, "\n{}", hex_dump(&frame.payload));
        }

        pacer.lock().pace();
        match ports.write(endpoint.id(), &frame.payload) {
            Ok(written) if written < frame.payload.len() => {
                ezmb_warn!(
                    context = ctx,
                    "partial write: {} of {} bytes",
                    written,
                    frame.payload.len()
                );
            }
            Ok(_) => {}
            Err(SerialError::Closed { .. }) => {
                ezmb_warn!(context = ctx, "port closed; dropping {} bytes", frame.payload.len());
            }
            Err(err) => ezmb_warn!(context = ctx, "serial write failed: {}", err),
        }
    })
}
