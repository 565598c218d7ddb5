//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Minimum inter-send delay enforcement."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use tracing::trace;

/// Enforces a minimum delay between consecutive sends on one device.
///
/// Blocking; meant for the thread that performs the write.
#[derive(Debug, Clone)]
pub struct SendPacer {
    min_delay: Duration,
    last_send: Option<Instant>,
}

impl SendPacer {
    /// Pacer that has not sent yet; the first send is never delayed.
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_send: None,
        }
    }

    /// Configured minimum gap between sends.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Time still to wait at `now` before the next send is allowed.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_send {
            Some(last) => (last + self.min_delay).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next send is allowed, then record it as sent.
    /// Returns how long the caller was held back.
    pub fn pace(&mut self) -> Duration {
        let wait = self.remaining(Instant::now());
        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "pacing send");
            std::thread::sleep(wait);
        }
        self.last_send = Some(Instant::now());
        wait
    }
}
