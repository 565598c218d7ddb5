//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Lua script transform plugins."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Lua transforms.
//!
//! A script defines a global `register_plugin(plugin)` that receives an empty
//! table and returns a table with `north_transform` and/or `south_transform`
//! functions. Each is called as `f(data, len)` and returns a string; `nil` or
//! an empty string drops the message.
//!
//! ```lua
//! function register_plugin(plugin)
//!     plugin.north_transform = function(data, len) return data:upper() end
//!     return plugin
//! end
//! ```

use std::path::{Path, PathBuf};

use mlua::{Function, Lua, RegistryKey, Value};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::transform::Transform;

const REGISTER: &str = "register_plugin";

/// A transform backed by its own Lua state.
pub struct LuaPlugin {
    name: String,
    lua: Lua,
    north: Option<RegistryKey>,
    south: Option<RegistryKey>,
}

impl LuaPlugin {
    /// Load and register the script at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read(path).map_err(|source| PluginError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_source(path, &source)
    }

    /// Register a script already in memory; `path` is used for naming only.
    pub fn from_source(path: &Path, source: &[u8]) -> Result<Self> {
        let name = path.display().to_string();
        let lua = Lua::new();
        lua.load(source).set_name(format!("@{name}")).exec()?;

        let register = match lua.globals().get::<Value>(REGISTER)? {
            Value::Function(register) => register,
            _ => return Err(register_error(path, format!("`{REGISTER}` is not defined"))),
        };
        let table = match register.call::<Value>(lua.create_table()?)? {
            Value::Table(table) => table,
            other => {
                return Err(register_error(
                    path,
                    format!("`{REGISTER}` returned {} instead of a table", other.type_name()),
                ))
            }
        };

        let north = registered_function(&lua, path, table.get::<Value>("north_transform")?, "north_transform")?;
        let south = registered_function(&lua, path, table.get::<Value>("south_transform")?, "south_transform")?;
        if north.is_none() && south.is_none() {
            return Err(register_error(path, "no transform functions registered".into()));
        }

        debug!(
            plugin = %name,
            north = north.is_some(),
            south = south.is_some(),
            "lua plugin registered"
        );
        Ok(Self {
            name,
            lua,
            north,
            south,
        })
    }

    fn call(&self, key: Option<&RegistryKey>, input: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let function: Function = self.lua.registry_value(key)?;
        let data = self.lua.create_string(input)?;
        let output: Value = function.call((data, input.len()))?;
        let bytes = match self.lua.coerce_string(output)? {
            Some(text) => text.as_bytes().to_vec(),
            None => Vec::new(),
        };
        Ok(Some(bytes))
    }
}

fn register_error(path: &Path, reason: String) -> PluginError {
    PluginError::Register {
        path: PathBuf::from(path),
        reason,
    }
}

fn registered_function(
    lua: &Lua,
    path: &Path,
    value: Value,
    field: &str,
) -> Result<Option<RegistryKey>> {
    match value {
        Value::Nil => Ok(None),
        Value::Function(function) => Ok(Some(lua.create_registry_value(function)?)),
        other => Err(register_error(
            path,
            format!("`{field}` is a {}, not a function", other.type_name()),
        )),
    }
}

impl Transform for LuaPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn north_transform(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        self.call(self.north.as_ref(), input)
    }

    fn south_transform(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        self.call(self.south.as_ref(), input)
    }
}

impl std::fmt::Debug for LuaPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaPlugin")
            .field("name", &self.name)
            .field("north", &self.north.is_some())
            .field("south", &self.south.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(source: &str) -> Result<LuaPlugin> {
        LuaPlugin::from_source(Path::new("test.lua"), source.as_bytes())
    }

    #[test]
    fn both_directions_are_called_with_length() {
        let mut plugin = plugin(
            r#"
            function register_plugin(p)
                p.north_transform = function(data, len) return data:upper() .. len end
                p.south_transform = function(data, len) return data:reverse() end
                return p
            end
            "#,
        )
        .unwrap();
        assert_eq!(plugin.north_transform(b"hello").unwrap(), Some(b"HELLO5".to_vec()));
        assert_eq!(plugin.south_transform(b"abc").unwrap(), Some(b"cba".to_vec()));
    }

    #[test]
    fn binary_payloads_survive() {
        let mut plugin = plugin(
            r#"
            function register_plugin(p)
                p.south_transform = function(data) return data end
                return p
            end
            "#,
        )
        .unwrap();
        let payload = [0x00, 0xff, 0x10, 0x00];
        assert_eq!(plugin.south_transform(&payload).unwrap(), Some(payload.to_vec()));
    }

    #[test]
    fn missing_direction_reports_none() {
        let mut plugin = plugin(
            r#"
            function register_plugin(p)
                p.south_transform = function(data) return data end
                return p
            end
            "#,
        )
        .unwrap();
        assert_eq!(plugin.north_transform(b"x").unwrap(), None);
    }

    #[test]
    fn nil_result_becomes_empty() {
        let mut plugin = plugin(
            r#"
            function register_plugin(p)
                p.north_transform = function() return nil end
                return p
            end
            "#,
        )
        .unwrap();
        assert_eq!(plugin.north_transform(b"x").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn runtime_errors_surface_as_script_errors() {
        let mut plugin = plugin(
            r#"
            function register_plugin(p)
                p.north_transform = function() error("bad frame") end
                return p
            end
            "#,
        )
        .unwrap();
        assert!(matches!(
            plugin.north_transform(b"x"),
            Err(PluginError::Script(_))
        ));
    }

    #[test]
    fn registration_failures_are_reported() {
        assert!(matches!(plugin("x = 1"), Err(PluginError::Register { .. })));
        assert!(matches!(
            plugin("function register_plugin(p) return 7 end"),
            Err(PluginError::Register { .. })
        ));
        assert!(matches!(
            plugin("function register_plugin(p) p.north_transform = 3 return p end"),
            Err(PluginError::Register { .. })
        ));
        assert!(matches!(
            plugin("function register_plugin(p) return p end"),
            Err(PluginError::Register { .. })
        ));
        assert!(matches!(plugin("this is not lua"), Err(PluginError::Script(_))));
    }
}
