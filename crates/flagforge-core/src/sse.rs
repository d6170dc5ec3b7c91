//! Stream event payloads published by the change hub.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagUpdatedData {
    pub flag_key: String,
    pub value: Value,
    pub variant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDeletedData {
    pub flag_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Wire event published to a (projectKey, envKey) scope's subscribers.
///
/// Serializes with `event`/`data` tags so an SSE transport can lift
/// `event_type()` into the `event:` line and `data` into the `data:` line
/// directly from the serialized JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FlagStreamEvent {
    FlagUpdate(FlagUpdatedData),
    FlagDeleted(FlagDeletedData),
    Heartbeat(HeartbeatData),
}

impl FlagStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FlagStreamEvent::FlagUpdate(_) => "flag_update",
            FlagStreamEvent::FlagDeleted(_) => "flag_deleted",
            FlagStreamEvent::Heartbeat(_) => "heartbeat",
        }
    }

    pub fn flag_update(flag_key: impl Into<String>, value: Value, variant: impl Into<String>) -> Self {
        FlagStreamEvent::FlagUpdate(FlagUpdatedData { flag_key: flag_key.into(), value, variant: variant.into() })
    }

    pub fn flag_deleted(flag_key: impl Into<String>) -> Self {
        FlagStreamEvent::FlagDeleted(FlagDeletedData { flag_key: flag_key.into() })
    }

    pub fn heartbeat(now: chrono::DateTime<chrono::Utc>) -> Self {
        FlagStreamEvent::Heartbeat(HeartbeatData { timestamp: now })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_matches_variant() {
        assert_eq!(FlagStreamEvent::flag_update("f", json!(true), "on").event_type(), "flag_update");
        assert_eq!(FlagStreamEvent::flag_deleted("f").event_type(), "flag_deleted");
        assert_eq!(FlagStreamEvent::heartbeat(chrono::Utc::now()).event_type(), "heartbeat");
    }

    #[test]
    fn serde_roundtrip_preserves_tag_and_payload() {
        let event = FlagStreamEvent::flag_update("checkout", json!("v2"), "v2-variant");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "flag_update");
        assert_eq!(json["data"]["flag_key"], "checkout");

        let roundtripped: FlagStreamEvent = serde_json::from_value(json).unwrap();
        assert_eq!(roundtripped.event_type(), event.event_type());
    }
}
