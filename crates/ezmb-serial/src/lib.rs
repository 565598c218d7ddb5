//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Serial port ownership and the multiplexing engine."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Serial field I/O.
//!
//! A [`PortSet`] owns any number of [`Port`]s keyed by id and runs two
//! workers: a reader that multiplexes every open descriptor with `poll(2)`
//! and hands received bytes to the port's handler, and a monitor that closes
//! ports whose device vanished and reopens closed ports once their device
//! path is accessible again.
#![warn(missing_docs)]

pub mod error;
pub mod line;
pub mod port;
pub mod portset;

pub use error::{Result, SerialError};
pub use port::{Port, PortHandler, PortStatus};
pub use portset::{PortSet, PortSetOptions};
