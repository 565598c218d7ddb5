//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Serial error taxonomy and I/O classification."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::io;
use std::path::PathBuf;

use ezmb_common::ConfigError;
use thiserror::Error;

/// Result alias for serial operations.
pub type Result<T> = std::result::Result<T, SerialError>;

/// Errors raised by ports and the port set.
#[derive(Debug, Error)]
pub enum SerialError {
    /// A port with this id is already registered.
    #[error("port '{id}' already exists")]
    DuplicateId {
        /// Offending id.
        id: String,
    },
    /// No port with this id is registered.
    #[error("port '{id}' not found")]
    NotFound {
        /// Requested id.
        id: String,
    },
    /// The port has no open descriptor.
    #[error("port '{id}' is closed")]
    Closed {
        /// Port id.
        id: String,
    },
    /// Unsupported or out-of-range line parameter.
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),
    /// Retryable I/O condition; the port stays open.
    #[error("transient I/O error")]
    TransientIo(#[source] io::Error),
    /// Non-retryable I/O condition; the port has been closed.
    #[error("fatal I/O error")]
    FatalIo(#[source] io::Error),
    /// The device could not be opened or configured.
    #[error("failed to open {device:?}")]
    Open {
        /// Device path.
        device: PathBuf,
        /// Driver failure.
        #[source]
        source: serialport::Error,
    },
    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} worker")]
    Spawn {
        /// Worker name.
        name: &'static str,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

/// Whether an I/O error is worth retrying on the next pass.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Wrap an I/O error as [`SerialError::TransientIo`] or [`SerialError::FatalIo`].
pub fn classify(err: io::Error) -> SerialError {
    if is_transient(&err) {
        SerialError::TransientIo(err)
    } else {
        SerialError::FatalIo(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_and_timeouts_are_transient() {
        for kind in [
            io::ErrorKind::WouldBlock,
            io::ErrorKind::Interrupted,
            io::ErrorKind::TimedOut,
        ] {
            assert!(matches!(
                classify(io::Error::from(kind)),
                SerialError::TransientIo(_)
            ));
        }
    }

    #[test]
    fn hangups_are_fatal() {
        for kind in [io::ErrorKind::BrokenPipe, io::ErrorKind::Other, io::ErrorKind::NotFound] {
            assert!(matches!(
                classify(io::Error::from(kind)),
                SerialError::FatalIo(_)
            ));
        }
    }
}
