use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Table;

/// Row-level change kinds published by the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A single row change. `new` holds the inserted/updated record and `old`
/// the previous one (for deletes only the primary key is guaranteed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub commit_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: Table, record: &T) -> serde_json::Result<Self> {
        Ok(Self {
            table,
            kind: ChangeKind::Insert,
            commit_timestamp: Some(Utc::now()),
            new: serde_json::to_value(record)?,
            old: Value::Null,
        })
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            commit_timestamp: Some(Utc::now()),
            new: Value::Null,
            old,
        }
    }

    pub fn decode_new<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.new)
    }

    pub fn decode_old<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.old)
    }

    /// Column value as text, looked up in `new` first and then `old`.
    pub fn column(&self, name: &str) -> Option<String> {
        [&self.new, &self.old]
            .into_iter()
            .filter_map(|record| record.get(name))
            .find(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

/// Which changes a subscriber wants: one table, optionally one change kind,
/// optionally rows whose column equals a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub kind: Option<ChangeKind>,
    pub eq: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            kind: None,
            eq: None,
        }
    }

    pub fn inserts(table: Table) -> Self {
        Self::table(table).kind(ChangeKind::Insert)
    }

    pub fn kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.eq = Some((column.into(), value.to_string()));
        self
    }

    /// Event name in the provider's wire syntax (`*` for all kinds).
    pub fn event_name(&self) -> &'static str {
        self.kind.map(|k| k.as_str()).unwrap_or("*")
    }

    /// Row filter in the provider's wire syntax, e.g. `channel_id=eq.<id>`.
    pub fn filter_expr(&self) -> Option<String> {
        self.eq
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        match &self.eq {
            Some((column, value)) => event.column(column).as_deref() == Some(value.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_insert(channel_id: &str) -> ChangeEvent {
        ChangeEvent {
            table: Table::Messages,
            kind: ChangeKind::Insert,
            commit_timestamp: None,
            new: json!({ "id": "m1", "channel_id": channel_id, "content": "hi" }),
            old: Value::Null,
        }
    }

    #[test]
    fn filter_by_channel_column() {
        let filter = ChangeFilter::inserts(Table::Messages).eq("channel_id", "c1");
        assert!(filter.matches(&message_insert("c1")));
        assert!(!filter.matches(&message_insert("c2")));
        assert_eq!(filter.filter_expr().as_deref(), Some("channel_id=eq.c1"));
        assert_eq!(filter.event_name(), "INSERT");
    }

    #[test]
    fn filter_rejects_other_table_and_kind() {
        let filter = ChangeFilter::inserts(Table::Reactions);
        assert!(!filter.matches(&message_insert("c1")));

        let delete = ChangeEvent::delete(Table::Channels, json!({ "id": "c1" }));
        assert!(!ChangeFilter::inserts(Table::Channels).matches(&delete));
        assert!(ChangeFilter::table(Table::Channels).matches(&delete));
        assert_eq!(delete.column("id").as_deref(), Some("c1"));
    }

    #[test]
    fn numeric_columns_compare_as_text() {
        let event = ChangeEvent {
            table: Table::Files,
            kind: ChangeKind::Insert,
            commit_timestamp: None,
            new: json!({ "file_size": 42 }),
            old: Value::Null,
        };
        assert!(ChangeFilter::table(Table::Files).eq("file_size", 42).matches(&event));
    }

    #[test]
    fn delete_carries_old_row() {
        let channel = crate::models::Channel {
            id: uuid::Uuid::new_v4(),
            name: "gone".into(),
            created_at: "2025-01-06T12:00:00Z".parse().unwrap(),
        };
        let event = ChangeEvent::delete(Table::Channels, serde_json::to_value(&channel).unwrap());

        assert!(event.new.is_null());
        assert_eq!(event.decode_old::<crate::models::Channel>().unwrap(), channel);
        assert!(event.decode_new::<crate::models::Channel>().is_err());
    }
}
