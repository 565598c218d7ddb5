//! ---
//! ezmb_section: "03-persistence-logging"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Structured logging context and payload dumps."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers for ezmb gateways.

use std::fmt::Write as _;

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber for short-lived tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Port or endpoint identifier.
    pub uid: Option<&'a str>,
    /// Bus topic the event relates to.
    pub topic: Option<&'a str>,
    /// Device path or peer address.
    pub device: Option<&'a str>,
    /// Traffic direction, `north` or `south`.
    pub direction: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a port or endpoint identifier.
    pub fn with_uid(mut self, uid: &'a str) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Attach a bus topic.
    pub fn with_topic(mut self, topic: &'a str) -> Self {
        self.topic = Some(topic);
        self
    }

    /// Attach a device path or peer address.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach a traffic direction.
    pub fn with_direction(mut self, direction: &'a str) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (port opened, relay stopped, ...).
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            uid = ctx.uid.unwrap_or(""),
            topic = ctx.topic.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::warn!(
            event,
            outcome = outcome.as_str(),
            uid = ctx.uid.unwrap_or(""),
            topic = ctx.topic.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            message = %message
        ),
    }
}

/// Render `data` as an offset / hex / ASCII table, eight bytes per row.
///
/// ```text
/// 0000: 68 65 6C 6C 6F 0A       | hello.
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(8) * 44);
    for (row, chunk) in data.chunks(8).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:04X}: ", row * 8);
        for byte in chunk {
            let _ = write!(out, "{:02X} ", byte);
        }
        for _ in chunk.len()..8 {
            out.push_str("   ");
        }
        out.push_str("| ");
        for &byte in chunk {
            out.push(if (32..=126).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
    }
    out
}
