//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Deterministic topic derivation for bus endpoints."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
/// Suffix of the topic an endpoint publishes under.
pub const PUBLISH_SUFFIX: &str = "_north_topic";
/// Suffix of the topic an endpoint subscribes to.
pub const SUBSCRIBE_SUFFIX: &str = "_south_topic";

/// The pair of topics derived from one endpoint id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topics {
    /// `{id}_north_topic`, used for every outgoing frame.
    pub publish: String,
    /// `{id}_south_topic`, the only topic delivered to the endpoint.
    pub subscribe: String,
}

impl Topics {
    /// Derive both topics for `id`.
    pub fn for_id(id: &str) -> Self {
        Self {
            publish: format!("{id}{PUBLISH_SUFFIX}"),
            subscribe: format!("{id}{SUBSCRIBE_SUFFIX}"),
        }
    }

    /// Whether a received frame topic is addressed to this endpoint.
    ///
    /// The transport filters by prefix, so `X_south_topic_extra` would pass the
    /// socket filter; only an exact match is delivered.
    pub fn accepts(&self, topic: &[u8]) -> bool {
        topic == self.subscribe.as_bytes()
    }
}

/// Endpoint id whose subscribe-topic equals `topic`, if it is one.
pub fn subscriber_id(topic: &str) -> Option<&str> {
    topic
        .strip_suffix(SUBSCRIBE_SUFFIX)
        .filter(|id| !id.is_empty())
}

/// Endpoint id whose publish-topic equals `topic`, if it is one.
pub fn publisher_id(topic: &str) -> Option<&str> {
    topic.strip_suffix(PUBLISH_SUFFIX).filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_derivation_rule() {
        let topics = Topics::for_id("mon1");
        assert_eq!(topics.publish, "mon1_north_topic");
        assert_eq!(topics.subscribe, "mon1_south_topic");
    }

    #[test]
    fn accepts_only_exact_subscribe_topic() {
        let topics = Topics::for_id("A");
        assert!(topics.accepts(b"A_south_topic"));
        assert!(!topics.accepts(b"A_north_topic"));
        assert!(!topics.accepts(b"A_south_topic_extra"));
        assert!(!topics.accepts(b"AB_south_topic"));
    }

    #[test]
    fn ids_are_recovered_from_topics() {
        assert_eq!(subscriber_id("ttyusb0_south_topic"), Some("ttyusb0"));
        assert_eq!(subscriber_id("ttyusb0_north_topic"), None);
        assert_eq!(subscriber_id("_south_topic"), None);
        assert_eq!(publisher_id("ttyusb0_north_topic"), Some("ttyusb0"));
    }
}
