use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use backchannel_types::models::{
    Channel, FileRecord, Message, NewChannel, NewFile, NewMessage, NewReaction, Reaction, Table,
};

use super::Database;
use crate::StoreError;

impl Database {
    // -- Channels --

    pub fn select_channels(&self) -> Result<Vec<Channel>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, created_at FROM channels ORDER BY created_at ASC, rowid ASC")
                .map_err(on_table(Table::Channels))?;
            let rows = stmt
                .query_map([], channel_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn insert_channel(&self, new: &NewChannel) -> Result<Channel, StoreError> {
        let channel = Channel {
            id: Uuid::new_v4(),
            name: new.name.clone(),
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![channel.id.to_string(), channel.name, timestamp(&channel.created_at)],
            )
            .map_err(on_table(Table::Channels))?;
            Ok(())
        })?;
        Ok(channel)
    }

    /// Returns false when no channel had that id.
    pub fn delete_channel(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn
                .execute("DELETE FROM channels WHERE id = ?1", [id.to_string()])
                .map_err(on_table(Table::Channels))?;
            Ok(n > 0)
        })
    }

    // -- Messages --

    pub fn select_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let mut messages = query_messages(conn, channel_id)?;
            if messages.is_empty() {
                return Ok(messages);
            }

            let mut reactions = query_reactions(conn, channel_id)?;
            let mut files = query_files(conn, channel_id)?;

            for message in &mut messages {
                message.reactions = reactions.remove(&message.id).unwrap_or_default();
                message.files = files.remove(&message.id).unwrap_or_default();
            }
            Ok(messages)
        })
    }

    pub fn insert_message(&self, new: &NewMessage) -> Result<Message, StoreError> {
        let message = Message {
            id: Uuid::new_v4(),
            channel_id: new.channel_id,
            username: new.username.clone(),
            content: new.content.clone(),
            created_at: Utc::now(),
            reactions: vec![],
            files: vec![],
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, username, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id.to_string(),
                    message.channel_id.to_string(),
                    message.username,
                    message.content,
                    timestamp(&message.created_at),
                ],
            )
            .map_err(on_table(Table::Messages))?;
            Ok(())
        })?;
        Ok(message)
    }

    // -- Reactions --

    pub fn insert_reaction(&self, new: &NewReaction) -> Result<Reaction, StoreError> {
        let reaction = Reaction {
            id: Uuid::new_v4(),
            message_id: new.message_id,
            user_id: new.user_id.clone(),
            emoji: new.emoji.clone(),
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reactions (id, message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reaction.id.to_string(),
                    reaction.message_id.to_string(),
                    reaction.user_id,
                    reaction.emoji,
                    timestamp(&reaction.created_at),
                ],
            )
            .map_err(on_table(Table::Reactions))?;
            Ok(())
        })?;
        Ok(reaction)
    }

    // -- Files --

    pub fn insert_file(&self, new: &NewFile) -> Result<FileRecord, StoreError> {
        let file = FileRecord {
            id: Uuid::new_v4(),
            message_id: new.message_id,
            file_name: new.file_name.clone(),
            file_type: new.file_type.clone(),
            file_size: new.file_size,
            file_url: new.file_url.clone(),
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (id, message_id, file_name, file_type, file_size, file_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    file.id.to_string(),
                    file.message_id.to_string(),
                    file.file_name,
                    file.file_type,
                    file.file_size,
                    file.file_url,
                    timestamp(&file.created_at),
                ],
            )
            .map_err(on_table(Table::Files))?;
            Ok(())
        })?;
        Ok(file)
    }
}

fn query_messages(conn: &Connection, channel_id: Uuid) -> Result<Vec<Message>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, channel_id, username, content, created_at
             FROM messages
             WHERE channel_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )
        .map_err(on_table(Table::Messages))?;

    let rows = stmt
        .query_map([channel_id.to_string()], |row| {
            Ok(Message {
                id: uuid_col(row, 0)?,
                channel_id: uuid_col(row, 1)?,
                username: row.get(2)?,
                content: row.get(3)?,
                created_at: time_col(row, 4)?,
                reactions: vec![],
                files: vec![],
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All reactions on a channel's messages, grouped by message.
fn query_reactions(conn: &Connection, channel_id: Uuid) -> Result<HashMap<Uuid, Vec<Reaction>>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.message_id, r.user_id, r.emoji, r.created_at
             FROM reactions r
             JOIN messages m ON m.id = r.message_id
             WHERE m.channel_id = ?1
             ORDER BY r.created_at ASC, r.rowid ASC",
        )
        .map_err(on_table(Table::Reactions))?;
    let rows = stmt
        .query_map([channel_id.to_string()], |row| {
            Ok(Reaction {
                id: uuid_col(row, 0)?,
                message_id: uuid_col(row, 1)?,
                user_id: row.get(2)?,
                emoji: row.get(3)?,
                created_at: time_col(row, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grouped: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
    for reaction in rows {
        grouped.entry(reaction.message_id).or_default().push(reaction);
    }
    Ok(grouped)
}

fn query_files(conn: &Connection, channel_id: Uuid) -> Result<HashMap<Uuid, Vec<FileRecord>>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.message_id, f.file_name, f.file_type, f.file_size, f.file_url, f.created_at
             FROM files f
             JOIN messages m ON m.id = f.message_id
             WHERE m.channel_id = ?1
             ORDER BY f.created_at ASC, f.rowid ASC",
        )
        .map_err(on_table(Table::Files))?;
    let rows = stmt
        .query_map([channel_id.to_string()], |row| {
            Ok(FileRecord {
                id: uuid_col(row, 0)?,
                message_id: uuid_col(row, 1)?,
                file_name: row.get(2)?,
                file_type: row.get(3)?,
                file_size: row.get(4)?,
                file_url: row.get(5)?,
                created_at: time_col(row, 6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grouped: HashMap<Uuid, Vec<FileRecord>> = HashMap::new();
    for file in rows {
        grouped.entry(file.message_id).or_default().push(file);
    }
    Ok(grouped)
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        created_at: time_col(row, 2)?,
    })
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Map SQLite's "no such table" onto the typed missing-table error.
fn on_table(table: Table) -> impl Fn(rusqlite::Error) -> StoreError {
    move |err| {
        let missing = matches!(
            &err,
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table")
        );
        if missing {
            StoreError::MissingTable { table: table.to_string() }
        } else {
            StoreError::Sqlite(err)
        }
    }
}
