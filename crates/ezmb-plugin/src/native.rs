//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Shared-object transform plugins."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Native transforms.
//!
//! The shared object exports
//! `int register_plugin(ezmb_plugin_driver_t *driver)`, which fills in one or
//! both callbacks and returns 0. A callback stores a `malloc`-allocated buffer
//! in `*out_data` and its length in `*out_size`; the host copies and frees it.
//! A null buffer or zero length drops the message.

use std::ffi::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::{Library, Symbol};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::transform::Transform;

const REGISTER_SYMBOL: &[u8] = b"register_plugin\0";

/// Callback signature shared by both directions.
pub type TransformCallback = unsafe extern "C" fn(
    ctx: *mut c_void,
    in_data: *const c_void,
    in_size: usize,
    out_data: *mut *mut c_void,
    out_size: *mut usize,
);

/// Table filled in by `register_plugin`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawDriver {
    /// Bus to wire conversion.
    pub north_transform: Option<TransformCallback>,
    /// Wire to bus conversion.
    pub south_transform: Option<TransformCallback>,
}

type RegisterFn = unsafe extern "C" fn(driver: *mut RawDriver) -> c_int;

/// A transform implemented by a dynamically loaded shared object.
pub struct NativePlugin {
    name: String,
    driver: RawDriver,
    // Keeps the callbacks in `driver` mapped.
    _library: Library,
}

impl NativePlugin {
    /// Load the shared object at `path` and run its registration function.
    pub fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the object's initialisers. Plugins are trusted
        // operator-supplied code, as with any dlopen host.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let mut driver = RawDriver::default();
        {
            // SAFETY: the symbol type matches the documented C prototype.
            let register: Symbol<'_, RegisterFn> = unsafe { library.get(REGISTER_SYMBOL) }
                .map_err(|_| PluginError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: "register_plugin",
                })?;
            // SAFETY: `driver` is a valid, initialised `RawDriver` for the call.
            let code = unsafe { register(&mut driver) };
            if code != 0 {
                return Err(PluginError::Register {
                    path: PathBuf::from(path),
                    reason: format!("register_plugin returned {code}"),
                });
            }
        }
        if driver.north_transform.is_none() && driver.south_transform.is_none() {
            return Err(PluginError::Register {
                path: PathBuf::from(path),
                reason: "no transform callbacks registered".into(),
            });
        }

        let name = path.display().to_string();
        debug!(
            plugin = %name,
            north = driver.north_transform.is_some(),
            south = driver.south_transform.is_some(),
            "native plugin registered"
        );
        Ok(Self {
            name,
            driver,
            _library: library,
        })
    }

    fn call(&self, callback: Option<TransformCallback>, input: &[u8]) -> Option<Vec<u8>> {
        let callback = callback?;
        let mut out_data: *mut c_void = ptr::null_mut();
        let mut out_size: usize = 0;
        // SAFETY: `input` is valid for `input.len()` bytes for the duration of
        // the call and both out-pointers reference live locals.
        unsafe {
            callback(
                ptr::null_mut(),
                input.as_ptr().cast(),
                input.len(),
                &mut out_data,
                &mut out_size,
            );
        }
        if out_data.is_null() {
            return Some(Vec::new());
        }
        // SAFETY: the callback contract promises `out_size` readable bytes in a
        // buffer allocated with malloc, whose ownership passes to us.
        let output = unsafe {
            let bytes = std::slice::from_raw_parts(out_data.cast::<u8>(), out_size).to_vec();
            libc::free(out_data);
            bytes
        };
        Some(output)
    }
}

impl Transform for NativePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn north_transform(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.call(self.driver.north_transform, input))
    }

    fn south_transform(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.call(self.driver.south_transform, input))
    }
}

impl std::fmt::Debug for NativePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePlugin")
            .field("name", &self.name)
            .field("north", &self.driver.north_transform.is_some())
            .field("south", &self.driver.south_transform.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{apply, Direction, Verdict};

    unsafe extern "C" fn upper(
        _ctx: *mut c_void,
        in_data: *const c_void,
        in_size: usize,
        out_data: *mut *mut c_void,
        out_size: *mut usize,
    ) {
        let input = std::slice::from_raw_parts(in_data.cast::<u8>(), in_size);
        let buf = libc::malloc(in_size.max(1)).cast::<u8>();
        for (i, byte) in input.iter().enumerate() {
            *buf.add(i) = byte.to_ascii_uppercase();
        }
        *out_data = buf.cast();
        *out_size = in_size;
    }

    unsafe extern "C" fn reject(
        _ctx: *mut c_void,
        _in_data: *const c_void,
        _in_size: usize,
        out_data: *mut *mut c_void,
        out_size: *mut usize,
    ) {
        *out_data = ptr::null_mut();
        *out_size = 0;
    }

    fn plugin(driver: RawDriver) -> NativePlugin {
        // The test binary itself stands in for the shared object.
        let library: Library = libloading::os::unix::Library::this().into();
        NativePlugin {
            name: "inline".into(),
            driver,
            _library: library,
        }
    }

    #[test]
    fn callbacks_copy_and_free_output() {
        let mut plugin = plugin(RawDriver {
            north_transform: Some(upper),
            south_transform: Some(reject),
        });
        assert_eq!(
            apply(&mut plugin, Direction::North, b"abc"),
            Verdict::Forward(b"ABC".to_vec())
        );
        assert_eq!(apply(&mut plugin, Direction::South, b"abc"), Verdict::Drop);
    }

    #[test]
    fn absent_callback_passes_through() {
        let mut plugin = plugin(RawDriver {
            north_transform: Some(upper),
            south_transform: None,
        });
        assert_eq!(plugin.south_transform(b"abc").unwrap(), None);
    }

    #[test]
    fn non_object_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.so");
        std::fs::write(&path, b"\x7fELFnot really").unwrap();
        assert!(matches!(
            NativePlugin::load(&path),
            Err(PluginError::Load { .. })
        ));
    }
}
