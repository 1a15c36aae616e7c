//! Wire models for hub events and registry listings.
//!
//! Fields that may be absent on the wire are `Option` with serde defaults;
//! validation happens in the normalizer, not at deserialization time, so a
//! partially filled envelope still parses and can be rejected with a
//! meaningful reason.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Raw event envelope as pushed by the hub on a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
    #[serde(default)]
    pub time_fired: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub context: Option<EventContext>,
}

/// Payload of a `state_changed` event.
///
/// `new_state` is absent when the entity was removed, `old_state` when it
/// was just created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub new_state: Option<StateObject>,
    #[serde(default)]
    pub old_state: Option<StateObject>,
}

/// A single entity state with its heterogeneous attribute map.
#[derive(Debug, Clone, Deserialize)]
pub struct StateObject {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Device registry entry from `config/device_registry/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_by_user: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sw_version: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    /// `[domain, unique id]` pairs; the domain of the first pair names the
    /// integration that owns the device.
    #[serde(default)]
    pub identifiers: Vec<Value>,
}

impl DeviceEntry {
    /// Display name, preferring the user-assigned one.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.name_by_user.as_deref().or(self.name.as_deref())
    }

    /// Integration domain from the first identifier pair, if present.
    #[must_use]
    pub fn integration(&self) -> Option<&str> {
        self.identifiers
            .first()
            .and_then(Value::as_array)
            .and_then(|pair| pair.first())
            .and_then(Value::as_str)
    }
}

/// Entity registry entry from `config/entity_registry/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityEntry {
    pub entity_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub disabled_by: Option<String>,
}

impl EntityEntry {
    /// Entity domain: the `entity_id` prefix before the dot.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.entity_id.split_once('.').map(|(domain, _)| domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_with_absent_states_parses() {
        let event: RawEvent = serde_json::from_str(
            r#"{"event_type":"state_changed","data":{"entity_id":"light.gone"}}"#,
        )
        .unwrap();

        assert!(event.data.new_state.is_none());
        assert!(event.data.old_state.is_none());
        assert!(event.time_fired.is_none());
    }

    #[test]
    fn test_device_integration_from_identifiers() {
        let device: DeviceEntry = serde_json::from_str(
            r#"{"id":"d1","name":"Hue Bridge","identifiers":[["hue","001788fffe23"]]}"#,
        )
        .unwrap();

        assert_eq!(device.integration(), Some("hue"));
        assert_eq!(device.display_name(), Some("Hue Bridge"));
    }

    #[test]
    fn test_device_tolerates_odd_identifiers() {
        let device: DeviceEntry =
            serde_json::from_str(r#"{"id":"d2","identifiers":[42,["zwave"]]}"#).unwrap();
        assert_eq!(device.integration(), None);
    }

    #[test]
    fn test_entity_domain_split() {
        let entity: EntityEntry =
            serde_json::from_str(r#"{"entity_id":"sensor.kitchen_temp"}"#).unwrap();
        assert_eq!(entity.domain(), Some("sensor"));
    }
}
