//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Payload transform plugins and the file-sniffing loader."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Payload transform plugins.
//!
//! Gateways convert payloads between wire format and bus format through a
//! [`Transform`]. Two backends exist: shared objects ([`NativePlugin`]) and
//! Lua scripts ([`LuaPlugin`]). [`load`] picks one by inspecting the file.
#![warn(missing_docs)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

pub mod error;
pub mod lua;
pub mod native;
pub mod transform;

pub use error::{PluginError, Result};
pub use lua::LuaPlugin;
pub use native::NativePlugin;
pub use transform::{apply, Direction, Passthrough, Transform, Verdict};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const LUA_BYTECODE_MAGIC: &[u8; 4] = b"\x1bLua";

/// Backend chosen for a plugin file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// ELF shared object.
    Native,
    /// Lua source script.
    Lua,
}

/// Classify `path` by its leading bytes.
pub fn sniff(path: &Path) -> Result<PluginKind> {
    let mut file = File::open(path).map_err(|source| PluginError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(source) => {
                return Err(PluginError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
    if filled == header.len() && &header == ELF_MAGIC {
        return Ok(PluginKind::Native);
    }
    if filled == header.len() && &header == LUA_BYTECODE_MAGIC {
        return Err(PluginError::Unsupported {
            path: path.to_path_buf(),
            reason: "precompiled Lua chunks are not accepted",
        });
    }
    Ok(PluginKind::Lua)
}

/// Load the plugin at `path` with the backend its contents call for.
pub fn load(path: impl AsRef<Path>) -> Result<Box<dyn Transform>> {
    let path = path.as_ref();
    let plugin: Box<dyn Transform> = match sniff(path)? {
        PluginKind::Native => Box::new(NativePlugin::load(path)?),
        PluginKind::Lua => Box::new(LuaPlugin::load(path)?),
    };
    tracing::info!(plugin = %plugin.name(), "transform plugin loaded");
    Ok(plugin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_distinguishes_backends() {
        let dir = tempfile::tempdir().unwrap();
        let elf = dir.path().join("a.so");
        let script = dir.path().join("a.lua");
        let short = dir.path().join("short");
        let bytecode = dir.path().join("a.luac");
        std::fs::write(&elf, b"\x7fELF\x02\x01").unwrap();
        std::fs::write(&script, b"-- script").unwrap();
        std::fs::write(&short, b"\x7fE").unwrap();
        std::fs::write(&bytecode, b"\x1bLuaT\x00").unwrap();

        assert_eq!(sniff(&elf).unwrap(), PluginKind::Native);
        assert_eq!(sniff(&script).unwrap(), PluginKind::Lua);
        assert_eq!(sniff(&short).unwrap(), PluginKind::Lua);
        assert!(matches!(
            sniff(&bytecode),
            Err(PluginError::Unsupported { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load("/nonexistent/ezmb-plugin.lua"),
            Err(PluginError::Io { .. })
        ));
    }

    #[test]
    fn load_dispatches_to_lua() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upper.lua");
        std::fs::write(
            &path,
            "function register_plugin(p)\n  p.north_transform = function(d) return d:upper() end\n  return p\nend\n",
        )
        .unwrap();
        let mut plugin = load(&path).unwrap();
        assert_eq!(
            apply(plugin.as_mut(), Direction::North, b"ok"),
            Verdict::Forward(b"OK".to_vec())
        );
        assert_eq!(
            apply(plugin.as_mut(), Direction::South, b"ok"),
            Verdict::Forward(b"ok".to_vec())
        );
    }

    #[test]
    fn load_dispatches_to_native() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.so");
        std::fs::write(&path, b"\x7fELF garbage").unwrap();
        assert!(matches!(load(&path), Err(PluginError::Load { .. })));
    }
}
