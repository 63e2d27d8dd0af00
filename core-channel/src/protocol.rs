//! Wire schema of the sync channel.

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Length of the random correlation id attached to every message.
pub const EVENT_ID_LENGTH: usize = 20;

/// Event types understood by the durable store's worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// A persisted key changed; the worker should refresh its cache.
    KeyChanged,
    /// Capability check; the worker answers with the event types it handles.
    Ping,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::KeyChanged => "keyChanged",
            EventType::Ping => "ping",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request posted by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub event_type: EventType,
    pub event_id: String,
    pub data: Value,
}

impl SyncMessage {
    /// Builds a message with a freshly generated correlation id.
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            event_id: generate_event_id(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ack,
    Done,
    Error,
}

/// Outcome of one receiver-side handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledResult {
    pub fulfilled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SettledResult {
    pub fn fulfilled(value: Value) -> Self {
        Self {
            fulfilled: true,
            value: Some(value),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            fulfilled: false,
            value: None,
            reason: Some(reason.into()),
        }
    }
}

impl From<std::result::Result<Value, String>> for SettledResult {
    fn from(result: std::result::Result<Value, String>) -> Self {
        match result {
            Ok(value) => Self::fulfilled(value),
            Err(reason) => Self::rejected(reason),
        }
    }
}

/// Reply posted on the message's reply port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReply {
    pub event_id: String,
    pub event_type: EventType,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<SettledResult>>,
}

impl SyncReply {
    pub fn ack(message: &SyncMessage) -> Self {
        Self {
            event_id: message.event_id.clone(),
            event_type: message.event_type,
            status: ReplyStatus::Ack,
            response: None,
        }
    }

    pub fn done(message: &SyncMessage, response: Vec<SettledResult>) -> Self {
        Self {
            event_id: message.event_id.clone(),
            event_type: message.event_type,
            status: ReplyStatus::Done,
            response: Some(response),
        }
    }
}

/// Random alphanumeric correlation id of [`EVENT_ID_LENGTH`] characters.
pub fn generate_event_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(EVENT_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_id_shape() {
        let id = generate_event_id();
        assert_eq!(id.len(), EVENT_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_event_id());
    }

    #[test]
    fn test_message_wire_names() {
        let message = SyncMessage {
            event_type: EventType::KeyChanged,
            event_id: "abc".to_string(),
            data: json!({ "key": "firebase:authUser:k:[DEFAULT]" }),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["eventType"], "keyChanged");
        assert_eq!(value["eventId"], "abc");
        assert_eq!(value["data"]["key"], "firebase:authUser:k:[DEFAULT]");
    }

    #[test]
    fn test_done_reply_carries_settled_results() {
        let message = SyncMessage::new(EventType::Ping, Value::Null);
        let reply = SyncReply::done(
            &message,
            vec![
                SettledResult::fulfilled(json!(["keyChanged"])),
                SettledResult::rejected("boom"),
            ],
        );
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "done");
        assert_eq!(value["response"][0]["fulfilled"], true);
        assert_eq!(value["response"][1]["reason"], "boom");
        assert!(value["response"][1].get("value").is_none());
    }
}
