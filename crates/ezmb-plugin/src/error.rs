//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Plugin loading and invocation errors."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or calling a transform plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin file could not be read.
    #[error("failed to read plugin {path}: {source}")]
    Io {
        /// Plugin path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The dynamic loader rejected a shared object.
    #[error("failed to load shared object {path}: {source}")]
    Load {
        /// Plugin path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: libloading::Error,
    },
    /// A required entry point is missing.
    #[error("plugin {path} does not export `{symbol}`")]
    MissingSymbol {
        /// Plugin path.
        path: PathBuf,
        /// Symbol name.
        symbol: &'static str,
    },
    /// The registration entry point failed or returned an unusable driver.
    #[error("plugin {path} failed to register: {reason}")]
    Register {
        /// Plugin path.
        path: PathBuf,
        /// Explanation.
        reason: String,
    },
    /// A Lua script failed to load or a Lua transform raised an error.
    #[error("lua error: {0}")]
    Script(#[from] mlua::Error),
    /// The file is of a kind that cannot be loaded.
    #[error("unsupported plugin {path}: {reason}")]
    Unsupported {
        /// Plugin path.
        path: PathBuf,
        /// Explanation.
        reason: &'static str,
    },
}

/// Result alias for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
