//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Topic-addressed endpoints and the north/south relay."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! The ezmb message bus.
//!
//! Every message is a two-part frame: a topic followed by an opaque payload.
//! A single [`Relay`] binds a north address (publishers connect) and a south
//! address (subscribers connect) and forwards frames north to south, while
//! subscription control frames travel back south to north.
//!
//! An [`Endpoint`] with id `X` publishes under `X_north_topic` and receives
//! only frames whose topic is `X_south_topic`.
#![warn(missing_docs)]

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod peer;
pub mod relay;
pub mod topic;

pub use endpoint::{Endpoint, EndpointHandle, FrameHandler};
pub use error::{BusError, Result};
pub use frame::Frame;
pub use peer::{Publisher, Subscriber};
pub use relay::{ControlFrame, FrameObserver, Relay, RelayStats};
pub use topic::Topics;

/// Bounded wait used by every bus loop so a cleared running flag is observed promptly.
pub const POLL_INTERVAL_MS: i64 = 100;

/// Outgoing high-water mark applied to publishing sockets.
pub const SEND_HIGH_WATER_MARK: i32 = 1000;
