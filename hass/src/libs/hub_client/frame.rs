//! Wire codec for the hub WebSocket protocol.
//!
//! All frames are JSON text. Client-initiated commands carry a correlation
//! id issued by [`CorrelationIds`]; the hub echoes it back on `result`,
//! `event` and `pong` frames so responses can be routed to their origin.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::libs::hub_client::models::RawEvent;

/// Monotonically increasing correlation id source, unique per session.
#[derive(Debug)]
pub struct CorrelationIds {
    next: AtomicU64,
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIds {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Issues the next id. Ids start at 1 and never repeat within a session.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Frames sent from this client to the hub.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: u64,
        event_type: String,
    },
    UnsubscribeEvents {
        id: u64,
        subscription: u64,
    },
    Ping {
        id: u64,
    },
    #[serde(rename = "config/device_registry/list")]
    DeviceRegistryList {
        id: u64,
    },
    #[serde(rename = "config/entity_registry/list")]
    EntityRegistryList {
        id: u64,
    },
}

/// Frames received from the hub.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthRequired {
        ha_version: String,
    },
    AuthOk {
        ha_version: String,
    },
    AuthInvalid {
        message: String,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<CommandError>,
    },
    Event {
        id: u64,
        event: RawEvent,
    },
    Pong {
        id: u64,
    },
    /// Message types this client does not know; logged and skipped.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired { .. } => "auth_required",
            Self::AuthOk { .. } => "auth_ok",
            Self::AuthInvalid { .. } => "auth_invalid",
            Self::Result { .. } => "result",
            Self::Event { .. } => "event",
            Self::Pong { .. } => "pong",
            Self::Unknown => "unknown",
        }
    }
}

/// Error payload attached to unsuccessful `result` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandError {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandError {
    #[must_use]
    pub fn describe(&self) -> String {
        let code = self
            .code
            .as_ref()
            .map_or_else(|| "?".to_owned(), ToString::to_string);
        let message = self.message.as_deref().unwrap_or("no message");
        format!("code={code}, message={message}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),
    #[error("failed to serialize frame: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Serializes an outgoing frame to its JSON text representation.
pub fn encode(frame: &ClientFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(CodecError::Serialize)
}

/// Parses an incoming JSON text frame.
pub fn decode(text: &str) -> Result<ServerFrame, CodecError> {
    serde_json::from_str(text).map_err(CodecError::MalformedFrame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let ids = CorrelationIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn test_encode_auth() {
        let frame = ClientFrame::Auth {
            access_token: "TOKEN".to_owned(),
        };
        assert_eq!(
            encode(&frame).unwrap(),
            r#"{"type":"auth","access_token":"TOKEN"}"#
        );
    }

    #[test]
    fn test_encode_subscribe_events() {
        let frame = ClientFrame::SubscribeEvents {
            id: 1,
            event_type: "state_changed".to_owned(),
        };
        assert_eq!(
            encode(&frame).unwrap(),
            r#"{"type":"subscribe_events","id":1,"event_type":"state_changed"}"#
        );
    }

    #[test]
    fn test_encode_registry_list_types() {
        let devices = ClientFrame::DeviceRegistryList { id: 7 };
        assert!(
            encode(&devices)
                .unwrap()
                .contains(r#""type":"config/device_registry/list""#)
        );

        let entities = ClientFrame::EntityRegistryList { id: 8 };
        assert!(
            encode(&entities)
                .unwrap()
                .contains(r#""type":"config/entity_registry/list""#)
        );
    }

    #[test]
    fn test_decode_auth_phases() {
        match decode(r#"{"type":"auth_required","ha_version":"2025.1.0"}"#).unwrap() {
            ServerFrame::AuthRequired { ha_version } => assert_eq!(ha_version, "2025.1.0"),
            other => panic!("unexpected frame: {}", other.kind()),
        }

        match decode(r#"{"type":"auth_invalid","message":"bad token"}"#).unwrap() {
            ServerFrame::AuthInvalid { message } => assert_eq!(message, "bad token"),
            other => panic!("unexpected frame: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_result_with_error() {
        let frame = decode(
            r#"{"id":5,"type":"result","success":false,"error":{"code":"unknown_command","message":"nope"}}"#,
        )
        .unwrap();

        match frame {
            ServerFrame::Result {
                id,
                success,
                error: Some(error),
                ..
            } => {
                assert_eq!(id, 5);
                assert!(!success);
                assert!(error.describe().contains("unknown_command"));
            }
            other => panic!("unexpected frame: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_event_frame() {
        let text = r#"{"id":1,"type":"event","event":{
            "event_type":"state_changed",
            "data":{"entity_id":"light.bedroom",
                    "new_state":{"state":"on","attributes":{"friendly_name":"Bed"}},
                    "old_state":{"state":"off","attributes":{}}},
            "time_fired":"2025-01-01T00:00:00Z",
            "origin":"LOCAL",
            "context":{"id":"c1","parent_id":null,"user_id":null}}}"#;

        match decode(text).unwrap() {
            ServerFrame::Event { id, event } => {
                assert_eq!(id, 1);
                assert_eq!(event.event_type, "state_changed");
                assert_eq!(event.data.entity_id.as_deref(), Some("light.bedroom"));
                assert_eq!(
                    event.data.new_state.as_ref().map(|s| s.state.as_str()),
                    Some("on")
                );
            }
            other => panic!("unexpected frame: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let frame = decode(r#"{"type":"zone_updated","data":{}}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Unknown));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode("{not json"),
            Err(CodecError::MalformedFrame(_))
        ));
    }
}
