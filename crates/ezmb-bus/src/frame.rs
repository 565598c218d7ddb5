//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Two-part topic/payload frame."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::borrow::Cow;

/// A (topic, payload) pair as carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Routing topic.
    pub topic: Vec<u8>,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame from its two parts.
    pub fn new(topic: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Interpret a received multipart message; anything but exactly two parts is rejected.
    pub fn from_parts(mut parts: Vec<Vec<u8>>) -> Option<Self> {
        if parts.len() != 2 {
            return None;
        }
        let payload = parts.pop()?;
        let topic = parts.pop()?;
        Some(Self { topic, payload })
    }

    /// Split back into wire parts.
    pub fn into_parts(self) -> [Vec<u8>; 2] {
        [self.topic, self.payload]
    }

    /// Topic rendered for logs.
    pub fn topic_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_requires_exactly_two() {
        let frame = Frame::from_parts(vec![b"t".to_vec(), b"p".to_vec()]).unwrap();
        assert_eq!(frame, Frame::new("t", "p"));
        assert!(Frame::from_parts(vec![b"t".to_vec()]).is_none());
        assert!(Frame::from_parts(vec![vec![], vec![], vec![]]).is_none());
    }

    #[test]
    fn topic_str_is_lossy() {
        let frame = Frame::new(vec![0x61, 0xFF], "x");
        assert_eq!(frame.topic_str(), "a\u{FFFD}");
    }
}
