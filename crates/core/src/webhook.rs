//! ClickUp webhook envelope and payload models.
//!
//! ClickUp wraps the affected task in a `payload` object and attaches the
//! triggering history entries as `history_items`. Parsing is deliberately
//! lenient: unknown fields are ignored and everything we do not strictly
//! need is optional, so schema drift on ClickUp's side never drops a
//! webhook on the floor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outer webhook body as delivered by ClickUp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Event name (e.g. "taskStatusUpdated"); not all senders include it.
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub history_items: Vec<Value>,
}

/// The task snapshot inside a webhook payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(default)]
    pub id: Option<String>,
    /// Parent task ID, present when the payload describes a subtask.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub status: Option<StatusRef>,
    #[serde(default)]
    pub custom_fields: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRef {
    pub status: String,
}

impl WebhookEnvelope {
    /// Parse a raw webhook body.
    pub fn from_value(raw: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw.clone())
    }

    pub fn task_id(&self) -> Option<&str> {
        self.payload.id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.payload.parent.as_deref().filter(|s| !s.is_empty())
    }

    pub fn team_id(&self) -> Option<&str> {
        self.payload.team_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn status_name(&self) -> Option<&str> {
        self.payload
            .status
            .as_ref()
            .map(|s| s.status.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_change_payload() {
        let raw: Value = serde_json::from_str(
            r##"{
                "event": "taskStatusUpdated",
                "payload": {
                    "id": "86c2yfq1e",
                    "team_id": "20420318",
                    "status": {"status": "in progress", "color": "#5f55ee"}
                },
                "history_items": [{"field": "status"}]
            }"##,
        )
        .unwrap();
        let envelope = WebhookEnvelope::from_value(&raw).unwrap();

        assert_eq!(envelope.event.as_deref(), Some("taskStatusUpdated"));
        assert_eq!(envelope.task_id(), Some("86c2yfq1e"));
        assert_eq!(envelope.status_name(), Some("in progress"));
        assert_eq!(envelope.history_items.len(), 1);
        assert!(envelope.parent_id().is_none());
    }

    #[test]
    fn test_parse_subtask_payload() {
        let raw: Value = serde_json::from_str(
            r#"{"payload": {"id": "sub1", "parent": "par1", "team_id": "t1"}}"#,
        )
        .unwrap();
        let envelope = WebhookEnvelope::from_value(&raw).unwrap();

        assert_eq!(envelope.task_id(), Some("sub1"));
        assert_eq!(envelope.parent_id(), Some("par1"));
        assert_eq!(envelope.team_id(), Some("t1"));
    }

    #[test]
    fn test_empty_ids_treated_as_missing() {
        let raw: Value =
            serde_json::from_str(r#"{"payload": {"id": "", "parent": ""}}"#).unwrap();
        let envelope = WebhookEnvelope::from_value(&raw).unwrap();

        assert!(envelope.task_id().is_none());
        assert!(envelope.parent_id().is_none());
    }

    #[test]
    fn test_missing_payload_defaults() {
        let raw: Value = serde_json::from_str(r#"{"event": "ping"}"#).unwrap();
        let envelope = WebhookEnvelope::from_value(&raw).unwrap();

        assert!(envelope.task_id().is_none());
        assert!(envelope.status_name().is_none());
        assert!(envelope.history_items.is_empty());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw: Value = serde_json::from_str(
            r#"{
                "payload": {"id": "x1", "date_created": "1700000000000", "creator": {"id": 5}},
                "webhook_id": "wh-1"
            }"#,
        )
        .unwrap();
        let envelope = WebhookEnvelope::from_value(&raw).unwrap();
        assert_eq!(envelope.task_id(), Some("x1"));
    }
}
