//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "North/south bus relay forwarding frames and subscription control."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ezmb_logging::{log_system_event, LogContext, SystemEventOutcome};
use tracing::{debug, trace, warn};

use crate::error::{connect_failed, BusError, Result};
use crate::frame::Frame;
use crate::POLL_INTERVAL_MS;

/// Callback invoked on the relay thread with every forwarded frame.
pub type FrameObserver = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Subscription-management message travelling from subscribers to publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame<'a> {
    /// A downstream subscriber added interest in a topic prefix.
    Subscribe(&'a [u8]),
    /// A downstream subscriber dropped interest in a topic prefix.
    Unsubscribe(&'a [u8]),
}

impl<'a> ControlFrame<'a> {
    /// Decode the `0x01`/`0x00` prefixed form used by the transport.
    pub fn parse(raw: &'a [u8]) -> Option<Self> {
        match raw.split_first()? {
            (1, topic) => Some(ControlFrame::Subscribe(topic)),
            (0, topic) => Some(ControlFrame::Unsubscribe(topic)),
            _ => None,
        }
    }
}

/// Counters maintained by the forwarding loop.
#[derive(Debug, Default)]
pub struct RelayStats {
    forwarded: AtomicU64,
    control: AtomicU64,
    malformed: AtomicU64,
}

impl RelayStats {
    /// Frames forwarded north to south.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Control frames forwarded south to north.
    pub fn control(&self) -> u64 {
        self.control.load(Ordering::Relaxed)
    }

    /// Inbound messages that were not two-part frames; still forwarded.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

struct Sockets {
    frontend: zmq::Socket,
    backend: zmq::Socket,
}

/// The single hop between publishers (north) and subscribers (south).
///
/// Holds no topic state of its own; subscription bookkeeping is left to the
/// transport, and the relay only shuttles control frames back upstream.
pub struct Relay {
    north: String,
    south: String,
    running: Arc<AtomicBool>,
    stats: Arc<RelayStats>,
    observer: Option<FrameObserver>,
    sockets: Option<Sockets>,
    worker: Option<JoinHandle<Sockets>>,
}

impl Relay {
    /// Bind the inbound (`north_url`) and outbound (`south_url`) sides.
    pub fn create(north_url: &str, south_url: &str, observer: Option<FrameObserver>) -> Result<Self> {
        let context = zmq::Context::new();

        let frontend = context.socket(zmq::XSUB).map_err(BusError::Socket)?;
        frontend.set_linger(0).map_err(BusError::Socket)?;
        frontend
            .bind(north_url)
            .map_err(|err| connect_failed("bind", north_url, err))?;

        let backend = context.socket(zmq::XPUB).map_err(BusError::Socket)?;
        backend.set_linger(0).map_err(BusError::Socket)?;
        backend
            .set_sndhwm(crate::SEND_HIGH_WATER_MARK)
            .map_err(BusError::Socket)?;
        backend
            .bind(south_url)
            .map_err(|err| connect_failed("bind", south_url, err))?;

        let north = last_endpoint(&frontend).unwrap_or_else(|| north_url.to_owned());
        let south = last_endpoint(&backend).unwrap_or_else(|| south_url.to_owned());
        debug!(north = %north, south = %south, "relay bound");

        Ok(Self {
            north,
            south,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RelayStats::default()),
            observer,
            sockets: Some(Sockets { frontend, backend }),
            worker: None,
        })
    }

    /// Resolved inbound address (wildcard ports are expanded).
    pub fn north_url(&self) -> &str {
        &self.north
    }

    /// Resolved outbound address.
    pub fn south_url(&self) -> &str {
        &self.south
    }

    /// Forwarding counters.
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the forwarding loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the forwarding loop on a background thread. A no-op when running.
    pub fn listen(&mut self) -> Result<()> {
        let Some(sockets) = self.sockets.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let observer = self.observer.clone();
        let spawned = thread::Builder::new()
            .name("ezmb-relay".into())
            .spawn(move || forward_loop(sockets, running, stats, observer));
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                log_system_event(
                    Some(&LogContext::new().with_device(&self.north)),
                    "relay.started",
                    &format!("forwarding {} -> {}", self.north, self.south),
                    SystemEventOutcome::Success,
                );
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                Err(BusError::Spawn {
                    name: "relay".into(),
                    source,
                })
            }
        }
    }

    /// Stop the forwarding loop and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(sockets) => {
                self.sockets = Some(sockets);
                log_system_event(
                    None,
                    "relay.stopped",
                    &format!(
                        "forwarded {} frames, {} control frames",
                        self.stats.forwarded(),
                        self.stats.control()
                    ),
                    SystemEventOutcome::Success,
                );
            }
            Err(_) => log_system_event(
                None,
                "relay.stopped",
                "forwarding loop panicked",
                SystemEventOutcome::Fault,
            ),
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("north", &self.north)
            .field("south", &self.south)
            .field("running", &self.is_running())
            .finish()
    }
}

fn last_endpoint(socket: &zmq::Socket) -> Option<String> {
    socket.get_last_endpoint().ok()?.ok()
}

fn forward_loop(
    sockets: Sockets,
    running: Arc<AtomicBool>,
    stats: Arc<RelayStats>,
    observer: Option<FrameObserver>,
) -> Sockets {
    while running.load(Ordering::Acquire) {
        let (inbound, outbound) = {
            let mut items = [
                sockets.frontend.as_poll_item(zmq::POLLIN),
                sockets.backend.as_poll_item(zmq::POLLIN),
            ];
            match zmq::poll(&mut items, POLL_INTERVAL_MS) {
                Ok(0) => continue,
                Ok(_) => (items[0].is_readable(), items[1].is_readable()),
                Err(zmq::Error::EINTR) => continue,
                Err(err) => {
                    warn!(error = %err, "relay poll failed");
                    thread::sleep(Duration::from_millis(POLL_INTERVAL_MS as u64));
                    continue;
                }
            }
        };

        if inbound {
            forward_data(&sockets, &stats, observer.as_ref());
        }
        if outbound {
            forward_control(&sockets, &stats);
        }
    }
    sockets
}

fn forward_data(sockets: &Sockets, stats: &RelayStats, observer: Option<&FrameObserver>) {
    let parts = match sockets.frontend.recv_multipart(zmq::DONTWAIT) {
        Ok(parts) => parts,
        Err(zmq::Error::EAGAIN) => return,
        Err(err) => {
            warn!(error = %err, "relay receive failed on north side");
            return;
        }
    };

    let result = if parts.len() == 2 {
        let Some(frame) = Frame::from_parts(parts) else {
            return;
        };
        trace!(topic = %frame.topic_str(), bytes = frame.payload.len(), "relaying frame");
        if let Some(observer) = observer {
            observer(&frame);
        }
        sockets.backend.send_multipart(frame.into_parts(), 0)
    } else {
        stats.malformed.fetch_add(1, Ordering::Relaxed);
        debug!(parts = parts.len(), "relaying non-frame message unchanged");
        sockets.backend.send_multipart(parts, 0)
    };

    match result {
        Ok(()) => {
            stats.forwarded.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => warn!(error = %err, "relay send failed on south side"),
    }
}

fn forward_control(sockets: &Sockets, stats: &RelayStats) {
    let parts = match sockets.backend.recv_multipart(zmq::DONTWAIT) {
        Ok(parts) => parts,
        Err(zmq::Error::EAGAIN) => return,
        Err(err) => {
            warn!(error = %err, "relay receive failed on south side");
            return;
        }
    };
    if let Some(first) = parts.first() {
        match ControlFrame::parse(first) {
            Some(ControlFrame::Subscribe(topic)) => {
                debug!(topic = %String::from_utf8_lossy(topic), "downstream subscribe")
            }
            Some(ControlFrame::Unsubscribe(topic)) => {
                debug!(topic = %String::from_utf8_lossy(topic), "downstream unsubscribe")
            }
            None => trace!(bytes = first.len(), "forwarding opaque control message"),
        }
    }
    match sockets.frontend.send_multipart(parts, 0) {
        Ok(()) => {
            stats.control.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => warn!(error = %err, "relay send failed on north side"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezmb_common::BusAddresses;

    #[test]
    fn control_frames_decode_subscription_flag() {
        assert_eq!(
            ControlFrame::parse(b"\x01abc"),
            Some(ControlFrame::Subscribe(b"abc"))
        );
        assert_eq!(
            ControlFrame::parse(b"\x00abc"),
            Some(ControlFrame::Unsubscribe(b"abc"))
        );
        assert_eq!(ControlFrame::parse(b"\x02abc"), None);
        assert_eq!(ControlFrame::parse(b""), None);
    }

    #[test]
    fn create_fails_when_address_already_bound() {
        let first = Relay::create("tcp://127.0.0.1:*", "tcp://127.0.0.1:*", None).unwrap();
        let err = Relay::create(first.north_url(), "tcp://127.0.0.1:*", None).unwrap_err();
        assert!(matches!(err, BusError::ConnectFailed { action: "bind", .. }));
    }

    #[test]
    fn wildcard_ports_are_resolved() {
        let relay = Relay::create("tcp://127.0.0.1:*", "tcp://127.0.0.1:*", None).unwrap();
        assert!(relay.north_url().starts_with("tcp://127.0.0.1:"));
        assert!(!relay.north_url().ends_with('*'));
        assert_ne!(relay.north_url(), relay.south_url());
    }

    #[test]
    fn listen_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let addrs = BusAddresses::ipc_in(dir.path());
        let mut relay = Relay::create(&addrs.north, &addrs.south, None).unwrap();
        relay.listen().unwrap();
        relay.listen().unwrap();
        assert!(relay.is_running());
        relay.stop();
        relay.stop();
        assert!(!relay.is_running());
        relay.listen().unwrap();
        assert!(relay.is_running());
    }
}
