//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Topic-addressed bus endpoint with a background receive loop."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ezmb_common::BusAddresses;
use ezmb_logging::{ezmb_debug, ezmb_info, ezmb_warn, LogContext};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{connect_failed, BusError, Result};
use crate::frame::Frame;
use crate::topic::Topics;
use crate::{POLL_INTERVAL_MS, SEND_HIGH_WATER_MARK};

/// Callback invoked on the receive thread for every frame addressed to the endpoint.
///
/// The handle lets the callback reply or stop the endpoint from inside the loop.
pub type FrameHandler = Arc<dyn Fn(&Frame, &EndpointHandle) + Send + Sync>;

struct Shared {
    id: String,
    topics: Topics,
    publisher: Mutex<zmq::Socket>,
    running: AtomicBool,
}

/// Cloneable send-side view of an [`Endpoint`].
#[derive(Clone)]
pub struct EndpointHandle {
    shared: Arc<Shared>,
}

impl EndpointHandle {
    /// Endpoint id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Derived topics.
    pub fn topics(&self) -> &Topics {
        &self.shared.topics
    }

    /// Publish `payload` under this endpoint's publish-topic.
    ///
    /// Never waits for a subscriber: with no reachable peer the frame is dropped
    /// by the transport. Returns the payload length on success.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        if payload.is_empty() {
            return Err(BusError::EmptyPayload);
        }
        let socket = self.shared.publisher.lock();
        socket
            .send(self.shared.topics.publish.as_bytes(), zmq::SNDMORE)
            .map_err(BusError::Send)?;
        socket.send(payload, 0).map_err(BusError::Send)?;
        trace!(
            uid = %self.shared.id,
            topic = %self.shared.topics.publish,
            bytes = payload.len(),
            "frame published"
        );
        Ok(payload.len())
    }

    /// Whether the receive loop is active.
    pub fn is_listening(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ask the receive loop to exit at its next poll boundary. Does not wait.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("id", &self.shared.id)
            .field("topics", &self.shared.topics)
            .finish()
    }
}

/// Subscriber socket and handler, owned by whichever side is not listening.
struct Receiver {
    socket: zmq::Socket,
    handler: FrameHandler,
}

/// A named bus participant.
///
/// Publishes to the relay's north address under `{id}_north_topic` and
/// receives from the south address frames whose topic is `{id}_south_topic`.
pub struct Endpoint {
    handle: EndpointHandle,
    receiver: Option<Receiver>,
    subscriber: Option<zmq::Socket>,
    worker: Option<JoinHandle<Receiver>>,
}

impl Endpoint {
    /// Connect a new endpoint to the relay at `addresses`.
    ///
    /// `handler` may be `None` for send-only use; [`Endpoint::listen`] then fails.
    pub fn create(id: &str, addresses: &BusAddresses, handler: Option<FrameHandler>) -> Result<Self> {
        let context = zmq::Context::new();
        let topics = Topics::for_id(id);

        let subscriber = context.socket(zmq::SUB).map_err(BusError::Socket)?;
        subscriber.set_linger(0).map_err(BusError::Socket)?;
        subscriber
            .connect(&addresses.south)
            .map_err(|err| connect_failed("connect", &addresses.south, err))?;
        subscriber
            .set_subscribe(topics.subscribe.as_bytes())
            .map_err(BusError::Socket)?;

        let publisher = context.socket(zmq::PUB).map_err(BusError::Socket)?;
        publisher.set_linger(0).map_err(BusError::Socket)?;
        publisher
            .set_sndhwm(SEND_HIGH_WATER_MARK)
            .map_err(BusError::Socket)?;
        // Drop rather than queue while the relay is unreachable.
        publisher.set_immediate(true).map_err(BusError::Socket)?;
        publisher
            .connect(&addresses.north)
            .map_err(|err| connect_failed("connect", &addresses.north, err))?;

        let ctx = LogContext::new()
            .with_uid(id)
            .with_topic(&topics.subscribe);
        ezmb_debug!(
            context = ctx,
            "endpoint connected (north {}, south {})",
            addresses.north,
            addresses.south
        );

        let handle = EndpointHandle {
            shared: Arc::new(Shared {
                id: id.to_owned(),
                topics,
                publisher: Mutex::new(publisher),
                running: AtomicBool::new(false),
            }),
        };
        let (receiver, subscriber) = match handler {
            Some(handler) => (
                Some(Receiver {
                    socket: subscriber,
                    handler,
                }),
                None,
            ),
            None => (None, Some(subscriber)),
        };
        Ok(Self {
            handle,
            receiver,
            subscriber,
            worker: None,
        })
    }

    /// Endpoint id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Derived topics.
    pub fn topics(&self) -> &Topics {
        self.handle.topics()
    }

    /// Cloneable send-side handle.
    pub fn handle(&self) -> EndpointHandle {
        self.handle.clone()
    }

    /// See [`EndpointHandle::send`].
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        self.handle.send(payload)
    }

    /// Whether the receive loop is active.
    pub fn is_listening(&self) -> bool {
        self.handle.is_listening()
    }

    /// Start the background receive loop. A no-op when already listening.
    pub fn listen(&mut self) -> Result<()> {
        if self.worker.is_some() {
            if self.is_listening() {
                return Ok(());
            }
            // Stopped from inside the handler; reclaim before restarting.
            self.join_worker();
        }
        let Some(receiver) = self.receiver.take() else {
            return Err(BusError::NoHandler {
                id: self.id().to_owned(),
            });
        };

        self.handle.shared.running.store(true, Ordering::Release);
        let handle = self.handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("ezmb-endpoint-{}", self.id()))
            .spawn(move || receive_loop(handle, receiver));
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(source) => {
                self.handle.shared.running.store(false, Ordering::Release);
                Err(BusError::Spawn {
                    name: format!("endpoint-{}", self.id()),
                    source,
                })
            }
        }
    }

    /// Stop the receive loop and wait for it to exit (at most one poll interval).
    pub fn stop(&mut self) {
        self.handle.stop();
        self.join_worker();
    }

    fn join_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // Dropped from inside the handler; the loop exits on its own.
            return;
        }
        match worker.join() {
            Ok(receiver) => self.receiver = Some(receiver),
            Err(_) => ezmb_warn!(
                context = LogContext::new().with_uid(self.id()),
                "endpoint receive loop panicked"
            ),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id())
            .field("listening", &self.is_listening())
            .field("send_only", &self.subscriber.is_some())
            .finish()
    }
}

fn receive_loop(handle: EndpointHandle, receiver: Receiver) -> Receiver {
    let shared = Arc::clone(&handle.shared);
    let ctx = LogContext::new()
        .with_uid(&shared.id)
        .with_topic(&shared.topics.subscribe);
    ezmb_info!(context = ctx.clone(), "endpoint listener started");

    while shared.running.load(Ordering::Acquire) {
        let readable = {
            let mut items = [receiver.socket.as_poll_item(zmq::POLLIN)];
            match zmq::poll(&mut items, POLL_INTERVAL_MS) {
                Ok(0) => false,
                Ok(_) => items[0].is_readable(),
                Err(zmq::Error::EINTR) => false,
                Err(err) => {
                    ezmb_warn!(context = ctx.clone(), "endpoint poll failed: {}", err);
                    thread::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS as u64));
                    false
                }
            }
        };
        if !readable {
            continue;
        }

        let parts = match receiver.socket.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) => parts,
            Err(zmq::Error::EAGAIN) => continue,
            Err(err) => {
                ezmb_warn!(context = ctx.clone(), "endpoint receive failed: {}", err);
                continue;
            }
        };
        let Some(frame) = Frame::from_parts(parts) else {
            ezmb_debug!(context = ctx.clone(), "dropping malformed multipart message");
            continue;
        };
        if !shared.topics.accepts(&frame.topic) {
            trace!(uid = %shared.id, topic = %frame.topic_str(), "ignoring frame for other topic");
            continue;
        }
        (receiver.handler)(&frame, &handle);
    }

    ezmb_info!(context = ctx, "endpoint listener stopped");
    receiver
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn addresses(dir: &tempfile::TempDir) -> BusAddresses {
        BusAddresses::ipc_in(dir.path())
    }

    #[test]
    fn send_rejects_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::create("U1", &addresses(&dir), None).unwrap();
        assert!(matches!(endpoint.send(b""), Err(BusError::EmptyPayload)));
    }

    #[test]
    fn send_without_relay_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::create("U1", &addresses(&dir), None).unwrap();
        for _ in 0..10 {
            assert_eq!(endpoint.send(b"abc").unwrap(), 3);
        }
    }

    #[test]
    fn listen_requires_handler() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = Endpoint::create("U1", &addresses(&dir), None).unwrap();
        assert!(matches!(
            endpoint.listen(),
            Err(BusError::NoHandler { id }) if id == "U1"
        ));
    }

    #[test]
    fn listen_and_stop_are_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: FrameHandler = Arc::new(move |_frame, _endpoint| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut endpoint = Endpoint::create("U1", &addresses(&dir), Some(handler)).unwrap();
        endpoint.listen().unwrap();
        endpoint.listen().unwrap();
        assert!(endpoint.is_listening());
        endpoint.stop();
        assert!(!endpoint.is_listening());
        endpoint.listen().unwrap();
        assert!(endpoint.is_listening());
        endpoint.stop();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn create_rejects_malformed_address() {
        let bad = BusAddresses::new("nonsense://x", "nonsense://y");
        let err = Endpoint::create("U1", &bad, None).unwrap_err();
        assert!(matches!(err, BusError::ConnectFailed { action: "connect", .. }));
    }
}
