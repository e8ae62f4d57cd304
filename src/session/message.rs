//! Application messages, subscriptions and topic validation

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QoS::AtMostOnce => "AtMostOnce",
            QoS::AtLeastOnce => "AtLeastOnce",
            QoS::ExactlyOnce => "ExactlyOnce",
        };
        write!(f, "{name}")
    }
}

/// A message to publish; built per call and never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub duplicate: bool,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: Bytes::new(),
            qos: QoS::AtMostOnce,
            retain: false,
            duplicate: false,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_duplicate(mut self, duplicate: bool) -> Self {
        self.duplicate = duplicate;
        self
    }
}

/// A message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// One topic filter the session keeps subscribed across reconnects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic_filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
        }
    }
}

/// Registration-ordered set of subscriptions keyed by topic filter
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    entries: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter; returns false if it was already present
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.contains(&subscription.topic_filter) {
            return false;
        }
        self.entries.push(subscription);
        true
    }

    /// Remove a filter; returns whether it was present
    pub fn remove(&mut self, topic_filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.topic_filter != topic_filter);
        self.entries.len() != before
    }

    pub fn contains(&self, topic_filter: &str) -> bool {
        self.entries.iter().any(|s| s.topic_filter == topic_filter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[Subscription] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<Subscription> {
        self.entries.clone()
    }
}

/// Check a topic filter: non-empty, `#` only as the whole last level, `+` only as a whole level
pub fn validate_topic_filter(filter: &str) -> Result<(), SessionError> {
    if filter.is_empty() {
        return Err(SessionError::invalid_topic(filter, "topic filter is empty"));
    }
    if filter.contains('\0') {
        return Err(SessionError::invalid_topic(filter, "contains NUL character"));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(SessionError::invalid_topic(
                filter,
                "'#' must occupy the entire last level",
            ));
        }
        if level.contains('+') && *level != "+" {
            return Err(SessionError::invalid_topic(
                filter,
                "'+' must occupy an entire level",
            ));
        }
    }
    Ok(())
}

/// Check a publish topic: non-empty and free of wildcards
pub fn validate_publish_topic(topic: &str) -> Result<(), SessionError> {
    if topic.is_empty() {
        return Err(SessionError::invalid_topic(topic, "topic is empty"));
    }
    if topic.contains(['+', '#']) {
        return Err(SessionError::invalid_topic(
            topic,
            "wildcards are not allowed in publish topics",
        ));
    }
    if topic.contains('\0') {
        return Err(SessionError::invalid_topic(topic, "contains NUL character"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_outbound_builder() {
        let message = OutboundMessage::new("mqttServerTopic")
            .with_payload("Test Message")
            .with_qos(QoS::ExactlyOnce)
            .with_retain(false)
            .with_duplicate(false);

        assert_eq!(message.topic, "mqttServerTopic");
        assert_eq!(message.payload, Bytes::from_static(b"Test Message"));
        assert_eq!(message.qos, QoS::ExactlyOnce);
        assert!(!message.retain);
        assert!(!message.duplicate);
    }

    #[test]
    fn test_inbound_payload_str_is_lossy() {
        let message = InboundMessage::new("t", vec![0x68, 0x69, 0xff], QoS::AtMostOnce, false);
        assert_eq!(message.payload_str(), "hi\u{fffd}");
    }

    #[test]
    fn test_qos_display() {
        assert_eq!(QoS::ExactlyOnce.to_string(), "ExactlyOnce");
    }

    #[test]
    fn test_subscriptions_keep_registration_order() {
        let mut subs = Subscriptions::new();
        assert!(subs.insert(Subscription::new("b", QoS::AtMostOnce)));
        assert!(subs.insert(Subscription::new("a", QoS::AtLeastOnce)));
        assert!(subs.insert(Subscription::new("c", QoS::AtMostOnce)));

        let order: Vec<&str> = subs.as_slice().iter().map(|s| s.topic_filter.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_subscriptions_idempotent_and_removable() {
        let mut subs = Subscriptions::new();
        assert!(subs.insert(Subscription::new("topicA", QoS::AtMostOnce)));
        assert!(!subs.insert(Subscription::new("topicA", QoS::ExactlyOnce)));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.as_slice()[0].qos, QoS::AtMostOnce);

        assert!(subs.remove("topicA"));
        assert!(!subs.remove("topicA"));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_validate_topic_filter() {
        for valid in ["a", "a/b", "a/+/c", "+", "#", "a/#", "+/+/#", "/leading"] {
            assert!(validate_topic_filter(valid).is_ok(), "{valid} should be valid");
        }
        for invalid in ["", "a/#/b", "a#", "a/b+", "#/a", "a/\0"] {
            assert!(
                matches!(
                    validate_topic_filter(invalid),
                    Err(SessionError::InvalidTopic { .. })
                ),
                "{invalid:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_validate_publish_topic() {
        assert!(validate_publish_topic("sensors/1/temp").is_ok());
        assert!(validate_publish_topic("").is_err());
        assert!(validate_publish_topic("sensors/+").is_err());
        assert!(validate_publish_topic("sensors/#").is_err());
    }

    proptest! {
        #[test]
        fn prop_subscriptions_hold_each_filter_once(
            filters in proptest::collection::vec("[a-d]{1,2}", 0..40)
        ) {
            let mut subs = Subscriptions::new();
            for filter in &filters {
                subs.insert(Subscription::new(filter.clone(), QoS::AtMostOnce));
            }

            let mut expected: Vec<String> = Vec::new();
            for filter in &filters {
                if !expected.contains(filter) {
                    expected.push(filter.clone());
                }
            }

            let actual: Vec<String> = subs
                .as_slice()
                .iter()
                .map(|s| s.topic_filter.clone())
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
