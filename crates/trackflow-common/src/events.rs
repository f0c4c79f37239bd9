//! Typed resource events and their wire representation
//!
//! Events are the only way the ingestion side and the processing worker talk
//! to each other. The `resource_id` doubles as the partition key, so all
//! events for one resource are strictly ordered relative to each other.

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::trace::TraceContext;

/// Topic the ingestion side publishes CREATE/DELETE events to.
pub const RESOURCE_TOPIC: &str = "resource-events";

/// Topic the processing worker publishes completion events to.
pub const COMPLETION_TOPIC: &str = "resource-processed";

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DEAD_LETTER_SUFFIX: &str = ".dlt";

/// Lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Create => write!(f, "CREATE"),
            EventType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Immutable resource lifecycle event.
///
/// Wire schema: `{"resourceId": "...", "eventType": "CREATE"|"DELETE"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEvent {
    resource_id: String,
    event_type: EventType,
}

impl ResourceEvent {
    /// Construct an event. Fails if the resource id is empty; events with
    /// missing fields must never reach the wire.
    pub fn new(resource_id: impl Into<String>, event_type: EventType) -> Result<Self> {
        let resource_id = resource_id.into();
        if resource_id.trim().is_empty() {
            return Err(FlowError::Validation(
                "resource event requires a non-empty resource id".to_string(),
            ));
        }
        Ok(Self {
            resource_id,
            event_type,
        })
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }
}

/// An event together with the headers it is delivered with.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub topic: String,
    pub event: ResourceEvent,
    pub trace: TraceContext,
}

/// Dead-letter topic name for a topic.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn event_rejects_empty_resource_id() {
        assert!(ResourceEvent::new("", EventType::Create).is_err());
        assert!(ResourceEvent::new("   ", EventType::Delete).is_err());
        assert!(ResourceEvent::new("42", EventType::Create).is_ok());
    }

    #[test]
    fn wire_format_is_camel_case_with_uppercase_type() {
        let event = ResourceEvent::new("17", EventType::Create).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"resourceId":"17","eventType":"CREATE"}"#);

        let parsed: ResourceEvent =
            serde_json::from_str(r#"{"resourceId":"9","eventType":"DELETE"}"#).unwrap();
        assert_eq!(parsed.resource_id(), "9");
        assert_eq!(parsed.event_type(), EventType::Delete);
    }

    #[test]
    fn dead_letter_topic_name() {
        assert_eq!(dead_letter_topic(RESOURCE_TOPIC), "resource-events.dlt");
    }
}
