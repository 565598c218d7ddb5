//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Configuration error taxonomy."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration handling.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while reading or validating port descriptors and line parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path:?}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON or has the wrong shape.
    #[error("failed to parse configuration at {path:?}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// A line parameter or descriptor field is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// One or more descriptors failed validation.
    #[error("configuration validation failed:\n{details}")]
    Validation {
        /// Newline separated list of problems.
        details: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}
