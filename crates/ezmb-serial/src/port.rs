//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "One serial device guarded by its own lock."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ezmb_common::PortConfig;
use ezmb_logging::{ezmb_warn, log_system_event, LogContext, SystemEventOutcome};
use parking_lot::Mutex;
use serialport::TTYPort;
use tracing::trace;

use crate::error::{is_transient, Result, SerialError};
use crate::line;

/// Callback receiving `(port id, bytes)` for every successful read.
///
/// Runs on the reader thread while the port's lock is held: it must not block
/// for long, and must not write to the same port synchronously.
pub type PortHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

struct PortIo {
    tty: Option<TTYPort>,
    /// Bumped on every successful open so stale poll results can be detected.
    generation: u64,
}

/// Outcome of servicing one readiness notification.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// Bytes were read and handed to the handler.
    Delivered(usize),
    /// Nothing to read or a retryable error.
    Idle,
    /// The port was closed or reopened since the snapshot was taken.
    Stale,
    /// A non-retryable error closed the port.
    Closed(std::io::Error),
}

/// Point-in-time view of a port for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    /// Port id.
    pub uid: String,
    /// Device path.
    pub device: String,
    /// Whether a descriptor is currently open.
    pub open: bool,
}

/// One serial device.
///
/// The descriptor lives behind the port's own lock; a closed port holds no
/// descriptor and is skipped by the reader loop.
pub struct Port {
    config: PortConfig,
    io: Mutex<PortIo>,
    running: AtomicBool,
    handler: PortHandler,
}

impl Port {
    pub(crate) fn new(config: PortConfig, handler: PortHandler) -> Self {
        Self {
            config,
            io: Mutex::new(PortIo {
                tty: None,
                generation: 0,
            }),
            running: AtomicBool::new(true),
            handler,
        }
    }

    /// Port id.
    pub fn id(&self) -> &str {
        &self.config.uid
    }

    /// Descriptor the port was created from.
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Device path.
    pub fn device(&self) -> &Path {
        &self.config.device
    }

    /// Whether a descriptor is currently open.
    pub fn is_open(&self) -> bool {
        self.io.lock().tty.is_some()
    }

    /// Whether the port is still managed (cleared on removal).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.running.store(false, Ordering::Release);
        self.close();
    }

    /// Snapshot for listings.
    pub fn status(&self) -> PortStatus {
        PortStatus {
            uid: self.config.uid.clone(),
            device: self.config.device.display().to_string(),
            open: self.is_open(),
        }
    }

    /// Open and configure the device if currently closed.
    ///
    /// Returns `Ok(true)` when a new descriptor was opened and `Ok(false)`
    /// when the port was already open or has been removed.
    pub fn open(&self) -> Result<bool> {
        let mut io = self.io.lock();
        if io.tty.is_some() || !self.is_running() {
            return Ok(false);
        }
        let tty = line::open(&self.config)?;
        io.tty = Some(tty);
        io.generation = io.generation.wrapping_add(1);
        drop(io);

        log_system_event(
            Some(&self.log_context()),
            "port.opened",
            &format!("opened at {}", self.config.line),
            SystemEventOutcome::Success,
        );
        Ok(true)
    }

    /// Close the descriptor if open. Returns whether one was closed.
    pub fn close(&self) -> bool {
        self.io.lock().tty.take().is_some()
    }

    /// Write `data` with a single write call.
    ///
    /// The count may be short; partial writes are not retried. A fatal error
    /// closes the port.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut io = self.io.lock();
        let Some(tty) = io.tty.as_mut() else {
            return Err(SerialError::Closed {
                id: self.config.uid.clone(),
            });
        };
        match tty.write(data) {
            Ok(written) => {
                if written < data.len() {
                    ezmb_warn!(
                        context = self.log_context(),
                        "short write: {} of {} bytes",
                        written,
                        data.len()
                    );
                }
                Ok(written)
            }
            Err(err) if is_transient(&err) => Err(SerialError::TransientIo(err)),
            Err(err) => {
                io.tty = None;
                drop(io);
                self.report_closed(&err);
                Err(SerialError::FatalIo(err))
            }
        }
    }

    /// Descriptor and generation to include in the next poll pass.
    pub(crate) fn poll_target(&self) -> Option<(RawFd, u64)> {
        let io = self.io.lock();
        io.tty.as_ref().map(|tty| (tty.as_raw_fd(), io.generation))
    }

    /// Close the port after an error/hangup event, unless it was reopened since.
    pub(crate) fn close_if_current(&self, generation: u64) -> bool {
        let mut io = self.io.lock();
        if io.generation != generation || io.tty.is_none() {
            return false;
        }
        io.tty = None;
        true
    }

    /// Perform exactly one read into `buf` and deliver it to the handler.
    ///
    /// The handler runs before the port lock is released.
    pub(crate) fn read_ready(&self, generation: u64, buf: &mut [u8]) -> ReadOutcome {
        let mut io = self.io.lock();
        if io.generation != generation {
            return ReadOutcome::Stale;
        }
        let Some(tty) = io.tty.as_mut() else {
            return ReadOutcome::Stale;
        };
        match tty.read(buf) {
            Ok(0) => ReadOutcome::Idle,
            Ok(count) => {
                trace!(uid = %self.config.uid, bytes = count, "serial read");
                (self.handler)(&self.config.uid, &buf[..count]);
                ReadOutcome::Delivered(count)
            }
            Err(err) if is_transient(&err) => ReadOutcome::Idle,
            Err(err) => {
                io.tty = None;
                ReadOutcome::Closed(err)
            }
        }
    }

    pub(crate) fn report_closed(&self, reason: &dyn std::fmt::Display) {
        log_system_event(
            Some(&self.log_context()),
            "port.closed",
            &reason.to_string(),
            SystemEventOutcome::Fault,
        );
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_uid(&self.config.uid)
            .with_device(self.config.device.to_str().unwrap_or("<non-utf8>"))
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("uid", &self.config.uid)
            .field("device", &self.config.device)
            .field("open", &self.is_open())
            .field("running", &self.is_running())
            .finish()
    }
}
