//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Runtime helpers shared by the gateways."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Thread hand-off and pacing helpers for the ezmb gateways.

pub mod pacing;
pub mod queue;

pub use pacing::SendPacer;
pub use queue::{FrameQueue, QueueFull};
