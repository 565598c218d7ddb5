//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Shared gateway handles and the transform worker."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use ezmb_bus::{EndpointHandle, Frame, FrameHandler};
use ezmb_logging::{ezmb_debug, ezmb_warn, LogContext};
use ezmb_plugin::{apply, Direction, Transform, Verdict};
use ezmb_rt::{FrameQueue, QueueFull};
use tokio::sync::broadcast;
use tracing::{debug, info};

const WORKER_POLL: Duration = Duration::from_millis(100);

/// A payload waiting for the transform worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    /// `South` for client bytes bound for the bus, `North` for bus frames bound for clients.
    pub direction: Direction,
    /// Untransformed bytes.
    pub payload: Vec<u8>,
}

/// Every handle shared between the listener, the connections and the worker.
#[derive(Clone)]
pub struct GatewayContext {
    endpoint: EndpointHandle,
    queue: Arc<FrameQueue<Staged>>,
    clients: broadcast::Sender<Bytes>,
    running: Arc<AtomicBool>,
}

impl GatewayContext {
    pub fn new(
        endpoint: EndpointHandle,
        queue: Arc<FrameQueue<Staged>>,
        clients: broadcast::Sender<Bytes>,
    ) -> Self {
        Self {
            endpoint,
            queue,
            clients,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn endpoint(&self) -> &EndpointHandle {
        &self.endpoint
    }

    /// Receiver for payloads broadcast to TCP clients.
    pub fn subscribe_clients(&self) -> broadcast::Receiver<Bytes> {
        self.clients.subscribe()
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.receiver_count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Queue `payload` for the worker. Returns false when the queue is full.
    pub fn stage(&self, direction: Direction, payload: Vec<u8>) -> bool {
        stage(&self.queue, direction, payload)
    }
}

fn stage(queue: &FrameQueue<Staged>, direction: Direction, payload: Vec<u8>) -> bool {
    match queue.push(Staged { direction, payload }) {
        Ok(()) => true,
        Err(QueueFull(staged)) => {
            ezmb_warn!(
                context = LogContext::new().with_direction(direction.as_str()),
                "staging queue full; dropping {} bytes",
                staged.payload.len()
            );
            false
        }
    }
}

/// Endpoint handler staging every received bus frame for the worker.
pub fn stage_from_bus(queue: Arc<FrameQueue<Staged>>) -> FrameHandler {
    Arc::new(move |frame: &Frame, _endpoint: &EndpointHandle| {
        stage(&queue, Direction::North, frame.payload.clone());
    })
}

/// Start the single worker that transforms and dispatches staged payloads.
pub fn spawn_worker(
    ctx: GatewayContext,
    transform: Box<dyn Transform>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ezmb-tcp-worker".into())
        .spawn(move || worker_loop(ctx, transform))
}

fn worker_loop(ctx: GatewayContext, mut transform: Box<dyn Transform>) {
    debug!(plugin = %transform.name(), "transform worker started");
    while ctx.is_running() {
        let Some(staged) = ctx.queue.pop_timeout(WORKER_POLL) else {
            continue;
        };
        let log_ctx = LogContext::new()
            .with_uid(ctx.endpoint.id())
            .with_direction(staged.direction.as_str());
        let payload = match apply(transform.as_mut(), staged.direction, &staged.payload) {
            Verdict::Forward(payload) => payload,
            Verdict::Drop => {
                ezmb_debug!(context = log_ctx, "transform dropped {} bytes", staged.payload.len());
                continue;
            }
        };
        match staged.direction {
            Direction::South => {
                if let Err(err) = ctx.endpoint.send(&payload) {
                    ezmb_warn!(context = log_ctx, "publish failed: {}", err);
                }
            }
            Direction::North => {
                let len = payload.len();
                if ctx.clients.send(Bytes::from(payload)).is_err() {
                    ezmb_debug!(context = log_ctx, "no clients connected; dropping {} bytes", len);
                }
            }
        }
    }
    let discarded = ctx.queue.clear();
    if discarded > 0 {
        info!(discarded, "transform worker discarded staged payloads on shutdown");
    }
    debug!("transform worker stopped");
}
