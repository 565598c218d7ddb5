//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Bus error taxonomy."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use thiserror::Error;

/// Result alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by endpoints, the relay and raw peers.
#[derive(Debug, Error)]
pub enum BusError {
    /// A socket could not be bound or connected.
    #[error("failed to {action} {address}")]
    ConnectFailed {
        /// `bind` or `connect`.
        action: &'static str,
        /// Transport address.
        address: String,
        /// Underlying transport failure.
        #[source]
        source: zmq::Error,
    },
    /// Sending a frame was rejected by the transport.
    #[error("send failed")]
    Send(#[source] zmq::Error),
    /// Receiving a frame failed.
    #[error("receive failed")]
    Receive(#[source] zmq::Error),
    /// Socket creation or option setting failed.
    #[error("socket setup failed")]
    Socket(#[source] zmq::Error),
    /// Empty payloads are not published.
    #[error("refusing to send an empty payload")]
    EmptyPayload,
    /// `listen` was called on an endpoint created without a handler.
    #[error("endpoint '{id}' has no receive handler")]
    NoHandler {
        /// Endpoint id.
        id: String,
    },
    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} worker")]
    Spawn {
        /// Worker name.
        name: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn connect_failed(action: &'static str, address: &str, source: zmq::Error) -> BusError {
    BusError::ConnectFailed {
        action,
        address: address.to_owned(),
        source,
    }
}
