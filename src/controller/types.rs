//! Wire shapes shared by the controller API client and event bridge (§3,
//! §6). Grounded on `ha/types.py`'s `EntityState`, `Service`, and `Event`
//! dataclasses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entity's current state, as returned by `GET /states` and
/// `GET /states/{entity_id}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default = "Utc::now")]
    pub last_changed: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    /// Best-effort `friendly_name` attribute lookup, falling back to the
    /// entity id itself.
    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }

    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }
}

/// One service a domain exposes, from `GET /services`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Service {
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Value,
}

/// One event frame dispatched over the streaming socket — either a
/// controller-native event or, after parsing, a decoded
/// [`InboundMessageEvent`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub time_fired: DateTime<Utc>,
}

/// An inbound operator message carried by a controller event (§6): either
/// free text or a slash-prefixed command, both decoded the same way.
/// Only events whose `user_id` matches the configured owner are processed
/// by the bridge's dispatch path; everyone else is dropped with a warning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundMessageEvent {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
    #[serde(default)]
    pub from_first_name: Option<String>,
    #[serde(default)]
    pub from_last_name: Option<String>,
    #[serde(default)]
    pub from_username: Option<String>,
    #[serde(default)]
    pub date: Option<i64>,
}

impl InboundMessageEvent {
    pub fn from_event_data(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    /// Best available display name: first+last, username, or the raw id.
    pub fn display_name(&self) -> String {
        match (&self.from_first_name, &self.from_last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self
                .from_username
                .clone()
                .unwrap_or_else(|| self.user_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_state_friendly_name_falls_back_to_id() {
        let raw = serde_json::json!({
            "entity_id": "light.bedroom",
            "state": "on",
            "attributes": {},
            "last_changed": "2026-01-01T00:00:00Z",
            "last_updated": "2026-01-01T00:00:00Z",
        });
        let state: EntityState = serde_json::from_value(raw).unwrap();
        assert_eq!(state.friendly_name(), "light.bedroom");
        assert_eq!(state.domain(), "light");
    }

    #[test]
    fn inbound_message_decodes_from_event_data() {
        let data = serde_json::json!({
            "message_id": 1,
            "chat_id": 100,
            "user_id": 42,
            "text": "turn on the lights",
            "from_username": "alice",
        });
        let event = InboundMessageEvent::from_event_data(&data).unwrap();
        assert_eq!(event.user_id, 42);
        assert_eq!(event.display_name(), "alice");
    }
}
