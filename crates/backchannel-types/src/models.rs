use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest attachment the client will accept (5 MiB).
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

// -- Rows mirrored from the provider tables --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    /// Free-text username of whoever reacted.
    pub user_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_url: String,
    pub created_at: DateTime<Utc>,
}

/// A message row. `reactions` and `files` come from a join and are absent
/// on rows delivered by the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl Message {
    /// Append a reaction unless one with the same id is already present.
    /// Returns true when the reaction was added.
    pub fn merge_reaction(&mut self, reaction: Reaction) -> bool {
        if self.reactions.iter().any(|r| r.id == reaction.id) {
            return false;
        }
        self.reactions.push(reaction);
        true
    }
}

// -- Insert payloads --

#[derive(Debug, Clone, Serialize)]
pub struct NewChannel {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub username: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewReaction {
    pub message_id: Uuid,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewFile {
    pub message_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_url: String,
}

// -- Client-side attachment --

/// A file picked by the user, held in memory until the message is sent.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn exceeds_limit(&self) -> bool {
        self.size() > MAX_ATTACHMENT_BYTES
    }
}

/// Provider tables this client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Channels,
    Messages,
    Reactions,
    Files,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channels => "channels",
            Self::Messages => "messages",
            Self::Reactions => "reactions",
            Self::Files => "files",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "channels" => Some(Self::Channels),
            "messages" => Some(Self::Messages),
            "reactions" => Some(Self::Reactions),
            "files" => Some(Self::Files),
            _ => None,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(id: Uuid, message_id: Uuid) -> Reaction {
        Reaction {
            id,
            message_id,
            user_id: "ada".into(),
            emoji: "👍".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn live_feed_row_defaults_joins() {
        let json = r#"{
            "id": "6f1c1d0e-8a55-4f3e-9a55-2f8f4d3b1a01",
            "channel_id": "00000000-0000-0000-0000-000000000001",
            "username": "ada",
            "content": "hello",
            "created_at": "2025-01-06T12:00:00.123456+00:00"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.reactions.is_empty());
        assert!(msg.files.is_empty());
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn merge_reaction_skips_known_id() {
        let mut msg = Message {
            id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            username: "ada".into(),
            content: "hi".into(),
            created_at: Utc::now(),
            reactions: vec![],
            files: vec![],
        };
        let r = reaction(Uuid::new_v4(), msg.id);
        assert!(msg.merge_reaction(r.clone()));
        assert!(!msg.merge_reaction(r));
        assert_eq!(msg.reactions.len(), 1);
    }

    #[test]
    fn attachment_limit_is_five_mebibytes() {
        let at_limit = Attachment::new("a.bin", "application/octet-stream", vec![0u8; MAX_ATTACHMENT_BYTES]);
        assert!(!at_limit.exceeds_limit());
        let over = Attachment::new("b.bin", "application/octet-stream", vec![0u8; MAX_ATTACHMENT_BYTES + 1]);
        assert!(over.exceeds_limit());
    }
}
