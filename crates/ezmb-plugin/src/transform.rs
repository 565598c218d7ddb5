//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Transform trait and the drop/forward decision applied by gateways."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::fmt;

use tracing::warn;

use crate::error::Result;

/// Which conversion to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bus format to wire format, towards north-side consumers.
    North,
    /// Wire format to bus format, towards the bus.
    South,
}

impl Direction {
    /// Lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pair of payload conversions.
///
/// Each method returns `Ok(None)` when the plugin does not implement that
/// direction, and `Ok(Some(bytes))` otherwise. An empty result means the
/// message must be dropped.
pub trait Transform: Send {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Convert a payload travelling north.
    fn north_transform(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Convert a payload travelling south.
    fn south_transform(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Dispatch on `direction`.
    fn transform(&mut self, direction: Direction, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match direction {
            Direction::North => self.north_transform(input),
            Direction::South => self.south_transform(input),
        }
    }
}

/// What the caller should do with a payload after transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward these bytes.
    Forward(Vec<u8>),
    /// Discard the message.
    Drop,
}

/// Run `transform` and reduce the outcome to a [`Verdict`].
///
/// A missing direction passes `input` through unchanged. Errors and empty
/// results both drop the message; no partial output is ever forwarded.
pub fn apply(transform: &mut dyn Transform, direction: Direction, input: &[u8]) -> Verdict {
    match transform.transform(direction, input) {
        Ok(None) => Verdict::Forward(input.to_vec()),
        Ok(Some(output)) if output.is_empty() => Verdict::Drop,
        Ok(Some(output)) => Verdict::Forward(output),
        Err(err) => {
            warn!(
                plugin = %transform.name(),
                direction = %direction,
                error = %err,
                "transform failed; dropping message"
            );
            Verdict::Drop
        }
    }
}

/// Transform implementing neither direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn north_transform(&mut self, _input: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn south_transform(&mut self, _input: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;

    struct Scripted {
        north: Option<Vec<u8>>,
        fail_south: bool,
    }

    impl Transform for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn north_transform(&mut self, _input: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.north.clone())
        }

        fn south_transform(&mut self, _input: &[u8]) -> Result<Option<Vec<u8>>> {
            if self.fail_south {
                Err(PluginError::Script(mlua::Error::runtime("boom")))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn passthrough_forwards_unchanged() {
        let mut plugin = Passthrough;
        assert_eq!(
            apply(&mut plugin, Direction::North, b"abc"),
            Verdict::Forward(b"abc".to_vec())
        );
        assert_eq!(
            apply(&mut plugin, Direction::South, b""),
            Verdict::Forward(Vec::new())
        );
    }

    #[test]
    fn empty_output_drops() {
        let mut plugin = Scripted {
            north: Some(Vec::new()),
            fail_south: false,
        };
        assert_eq!(apply(&mut plugin, Direction::North, b"abc"), Verdict::Drop);
    }

    #[test]
    fn converted_output_is_forwarded() {
        let mut plugin = Scripted {
            north: Some(b"ABC".to_vec()),
            fail_south: false,
        };
        assert_eq!(
            apply(&mut plugin, Direction::North, b"abc"),
            Verdict::Forward(b"ABC".to_vec())
        );
    }

    #[test]
    fn errors_drop_instead_of_propagating() {
        let mut plugin = Scripted {
            north: None,
            fail_south: true,
        };
        assert_eq!(apply(&mut plugin, Direction::South, b"abc"), Verdict::Drop);
    }
}
