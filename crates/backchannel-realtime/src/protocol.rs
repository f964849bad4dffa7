//! Wire frames for the provider's realtime socket (Phoenix channels, JSON
//! serializer `vsn=1.0.0`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use backchannel_types::events::{ChangeEvent, ChangeFilter, ChangeKind};
use backchannel_types::models::Table;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: &str, reference: String) -> Self {
        let mut change = json!({
            "event": filter.event_name(),
            "schema": "public",
            "table": filter.table.as_str(),
        });
        if let Some(expr) = filter.filter_expr() {
            change["filter"] = Value::String(expr);
        }

        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                },
                "access_token": access_token,
            }),
            join_ref: Some(reference.clone()),
            reference: Some(reference),
        }
    }

    pub fn leave(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }

    /// `status` of a `phx_reply` frame (`ok` / `error`).
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    pub fn reply_reason(&self) -> String {
        let response = self.payload.get("response");
        response
            .and_then(|r| r.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| response.map(|r| r.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChangesPayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    commit_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    old_record: Value,
}

/// Decode the payload of a `postgres_changes` frame. Rows for tables this
/// client does not know about yield `None`.
pub fn decode_change(payload: &Value) -> serde_json::Result<Option<ChangeEvent>> {
    let parsed = ChangesPayload::deserialize(payload)?;
    let Some(table) = Table::from_name(&parsed.data.table) else {
        return Ok(None);
    };

    Ok(Some(ChangeEvent {
        table,
        kind: parsed.data.kind,
        commit_timestamp: parsed.data.commit_timestamp,
        new: parsed.data.record,
        old: parsed.data.old_record,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_postgres_changes_config() {
        let filter = ChangeFilter::inserts(Table::Messages).eq("channel_id", "abc");
        let frame = Frame::join("realtime:messages:1", &filter, "key", "1".into());
        let text = serde_json::to_value(&frame).unwrap();

        assert_eq!(text["event"], "phx_join");
        assert_eq!(text["ref"], "1");
        let change = &text["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["table"], "messages");
        assert_eq!(change["filter"], "channel_id=eq.abc");
    }

    #[test]
    fn decodes_postgres_change_frame() {
        let raw = r#"{
            "topic": "realtime:reactions:2",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [31],
                "data": {
                    "schema": "public",
                    "table": "reactions",
                    "type": "INSERT",
                    "commit_timestamp": "2025-01-06T12:00:00.5Z",
                    "columns": [],
                    "errors": null,
                    "record": { "id": "r1", "message_id": "m1", "emoji": "🎉" }
                }
            }
        }"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        assert!(frame.reference.is_none());

        let event = decode_change(&frame.payload).unwrap().unwrap();
        assert_eq!(event.table, Table::Reactions);
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.column("message_id").as_deref(), Some("m1"));
        assert!(event.old.is_null());
    }

    #[test]
    fn unknown_table_is_ignored() {
        let payload = json!({
            "data": { "table": "audit_log", "type": "DELETE", "commit_timestamp": null, "old_record": { "id": 1 } }
        });
        assert!(decode_change(&payload).unwrap().is_none());
    }

    #[test]
    fn error_reply_reason() {
        let frame: Frame = serde_json::from_value(json!({
            "topic": "realtime:x",
            "event": "phx_reply",
            "ref": "4",
            "payload": { "status": "error", "response": { "reason": "invalid filter" } }
        }))
        .unwrap();
        assert_eq!(frame.reply_status(), Some("error"));
        assert_eq!(frame.reply_reason(), "invalid filter");
    }
}
