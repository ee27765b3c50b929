//! CloudEvents envelope and broadcast bookkeeping.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::connection::ConnectionId;
use crate::error::{Error, Result};

/// CloudEvents specification version emitted by this gateway.
pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

/// Event envelope using CloudEvents 1.0 attribute names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CloudEvent {
    /// Unique event ID
    #[serde(default = "new_event_id")]
    pub id: String,
    /// URI-reference of the producer
    pub source: String,
    /// Event type, e.g. `agent.task.completed`
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_spec_version() -> String {
    CLOUD_EVENTS_SPEC_VERSION.to_string()
}

impl CloudEvent {
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: new_event_id(),
            source: source.into(),
            event_type: event_type.into(),
            specversion: default_spec_version(),
            subject: None,
            time: Utc::now(),
            datacontenttype: Some("application/json".to_string()),
            data,
            extensions: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }

    /// Reject events without a type or source.
    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(Error::invalid_request("event has an empty type"));
        }
        if self.source.trim().is_empty() {
            return Err(Error::invalid_request(format!(
                "event '{}' has an empty source",
                self.event_type
            )));
        }
        Ok(())
    }
}

/// Whether a subscription pattern selects an event type.
///
/// A pattern is either an exact type or a prefix followed by `*`.
pub fn event_type_matches(pattern: &str, event_type: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => event_type.starts_with(prefix),
        None => pattern == event_type,
    }
}

/// A connection that could not be reached during a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeliveryFailure {
    pub connection_id: ConnectionId,
    pub error: String,
}

/// Per-broadcast delivery summary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BroadcastReport {
    pub event_id: String,
    /// Connections the event was sent to.
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    pub fn empty(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            attempted: 0,
            delivered: 0,
            failures: Vec::new(),
        }
    }

    /// True when there were targets and none of them received the event.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.delivered == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_uses_cloud_events_attribute_names() {
        let event = CloudEvent::new("agents://planner", "task.done", json!({"ok": true}))
            .with_subject("task-1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task.done");
        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["subject"], "task-1");
    }

    #[test]
    fn minimal_event_fills_defaults() {
        let event: CloudEvent = serde_json::from_value(json!({
            "source": "agents://coder",
            "type": "build.started"
        }))
        .unwrap();
        assert!(!event.id.is_empty());
        assert_eq!(event.specversion, CLOUD_EVENTS_SPEC_VERSION);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn event_without_source_is_invalid() {
        let event = CloudEvent::new("", "task.done", json!(null));
        assert!(matches!(event.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn subscription_patterns() {
        assert!(event_type_matches("task.done", "task.done"));
        assert!(!event_type_matches("task.done", "task.failed"));
        assert!(event_type_matches("task.*", "task.failed"));
        assert!(event_type_matches("*", "anything"));
        assert!(!event_type_matches("build.*", "task.done"));
    }
}
