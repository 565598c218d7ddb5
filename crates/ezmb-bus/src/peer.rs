//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Raw publisher and subscriber peers for tooling and diagnostics."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Raw bus peers.
//!
//! Unlike [`crate::Endpoint`], these are not bound to a derived topic pair:
//! a [`Publisher`] sends under any topic and a [`Subscriber`] may follow any
//! set of topic prefixes. They back the operator CLI and integration tests.

use std::time::{Duration, Instant};

use crate::error::{connect_failed, BusError, Result};
use crate::frame::Frame;
use crate::SEND_HIGH_WATER_MARK;

/// Publishes arbitrary frames to the relay's north address.
pub struct Publisher {
    socket: zmq::Socket,
}

impl Publisher {
    /// Connect to `north_url`.
    pub fn connect(north_url: &str) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::PUB).map_err(BusError::Socket)?;
        socket.set_linger(0).map_err(BusError::Socket)?;
        socket
            .set_sndhwm(SEND_HIGH_WATER_MARK)
            .map_err(BusError::Socket)?;
        socket
            .connect(north_url)
            .map_err(|err| connect_failed("connect", north_url, err))?;
        Ok(Self { socket })
    }

    /// Publish one frame.
    pub fn publish(&self, topic: &[u8], payload: &[u8]) -> Result<()> {
        self.socket
            .send(topic, zmq::SNDMORE)
            .map_err(BusError::Send)?;
        self.socket.send(payload, 0).map_err(BusError::Send)
    }
}

/// Receives frames from the relay's south address.
pub struct Subscriber {
    socket: zmq::Socket,
}

impl Subscriber {
    /// Connect to `south_url` following every prefix in `topics`.
    ///
    /// An empty prefix follows all traffic.
    pub fn connect<T: AsRef<[u8]>>(south_url: &str, topics: &[T]) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::SUB).map_err(BusError::Socket)?;
        socket.set_linger(0).map_err(BusError::Socket)?;
        socket
            .connect(south_url)
            .map_err(|err| connect_failed("connect", south_url, err))?;
        let subscriber = Self { socket };
        for topic in topics {
            subscriber.subscribe(topic.as_ref())?;
        }
        Ok(subscriber)
    }

    /// Follow an additional topic prefix.
    pub fn subscribe(&self, topic: &[u8]) -> Result<()> {
        self.socket.set_subscribe(topic).map_err(BusError::Socket)
    }

    /// Wait up to `timeout` for the next two-part frame.
    ///
    /// Messages that are not two-part frames are skipped.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ready = {
                let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
                match zmq::poll(&mut items, remaining.as_millis() as i64) {
                    Ok(_) => items[0].is_readable(),
                    Err(zmq::Error::EINTR) => false,
                    Err(err) => return Err(BusError::Receive(err)),
                }
            };
            if ready {
                match self.socket.recv_multipart(zmq::DONTWAIT) {
                    Ok(parts) => {
                        if let Some(frame) = Frame::from_parts(parts) {
                            return Ok(Some(frame));
                        }
                    }
                    Err(zmq::Error::EAGAIN) => {}
                    Err(err) => return Err(BusError::Receive(err)),
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_times_out_without_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("ipc://{}", dir.path().join("south.ipc").display());
        let subscriber = Subscriber::connect(&url, &["x"]).unwrap();
        let started = Instant::now();
        assert!(subscriber
            .recv_timeout(Duration::from_millis(50))
            .unwrap()
            .is_none());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn publisher_rejects_malformed_address() {
        assert!(matches!(
            Publisher::connect("bogus"),
            Err(BusError::ConnectFailed { .. })
        ));
    }
}
