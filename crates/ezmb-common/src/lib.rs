//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Shared configuration and logging primitives."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Shared primitives for the ezmb gateway workspace.
//! This crate exposes serial line parameters, port descriptor loading,
//! bus address defaults, the tracing bootstrap and the shutdown signal
//! consumed by every binary.
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod line;
pub mod logging;
pub mod signal;

pub use config::{
    device_uid, BusAddresses, LoggingConfig, PortConfig, PortConfigFile, DEFAULT_MAXLEN,
    DEFAULT_NORTH_URL, DEFAULT_SOUTH_URL, DEFAULT_TIMEOUT_MS, MAX_MAXLEN,
};
pub use error::{ConfigError, Result};
pub use line::{BaudRate, DataBits, LineConfig, Parity, StopBits};
pub use logging::{init_tracing, LogFormat};
pub use signal::shutdown_signal;
