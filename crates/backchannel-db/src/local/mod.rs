//! Local development backend: SQLite tables, filesystem objects and an
//! in-process change feed.

pub mod migrations;
pub mod objects;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use backchannel_realtime::Dispatcher;
use backchannel_types::events::ChangeEvent;
use backchannel_types::models::{
    Channel, FileRecord, Message, NewChannel, NewFile, NewMessage, NewReaction, Reaction, Table,
};

use crate::{Backend, StoreError};
use objects::ObjectStore;

const DB_FILE: &str = "backchannel.db";
const OBJECTS_DIR: &str = "objects";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        info!("Local database opened at {}", label);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }
}

pub struct LocalBackend {
    db: Database,
    objects: ObjectStore,
    feed: Dispatcher,
}

impl LocalBackend {
    /// Open (or create) a local store under `dir` with `bucket` available.
    pub async fn open(dir: &Path, bucket: &str) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        let db = Database::open(&dir.join(DB_FILE))?;
        Self::with_database(db, dir, bucket).await
    }

    /// In-memory tables with objects stored under `dir`.
    pub async fn ephemeral(dir: &Path, bucket: &str) -> Result<Self, StoreError> {
        Self::with_database(Database::open_in_memory()?, dir, bucket).await
    }

    async fn with_database(db: Database, dir: &Path, bucket: &str) -> Result<Self, StoreError> {
        let objects = ObjectStore::new(dir.join(OBJECTS_DIR)).await?;
        objects.create_bucket(bucket).await?;
        Ok(Self {
            db,
            objects,
            feed: Dispatcher::new(),
        })
    }

    /// Change feed fed by every write through this backend.
    pub fn feed(&self) -> Dispatcher {
        self.feed.clone()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    fn publish<T: serde::Serialize>(&self, table: Table, record: &T) -> Result<(), StoreError> {
        self.feed.publish(ChangeEvent::insert(table, record)?);
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn select_channels(&self) -> Result<Vec<Channel>, StoreError> {
        self.db.select_channels()
    }

    async fn insert_channel(&self, new: &NewChannel) -> Result<Channel, StoreError> {
        let channel = self.db.insert_channel(new)?;
        self.publish(Table::Channels, &channel)?;
        Ok(channel)
    }

    async fn delete_channel(&self, id: Uuid) -> Result<(), StoreError> {
        if self.db.delete_channel(id)? {
            self.feed.publish(ChangeEvent::delete(Table::Channels, json!({ "id": id })));
        }
        Ok(())
    }

    async fn select_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.db.select_messages(channel_id)
    }

    async fn insert_message(&self, new: &NewMessage) -> Result<Message, StoreError> {
        let message = self.db.insert_message(new)?;
        self.publish(Table::Messages, &message)?;
        Ok(message)
    }

    async fn insert_reaction(&self, new: &NewReaction) -> Result<Reaction, StoreError> {
        let reaction = self.db.insert_reaction(new)?;
        self.publish(Table::Reactions, &reaction)?;
        Ok(reaction)
    }

    async fn insert_file(&self, new: &NewFile) -> Result<FileRecord, StoreError> {
        let file = self.db.insert_file(new)?;
        self.publish(Table::Files, &file)?;
        Ok(file)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        data: Bytes,
    ) -> Result<String, StoreError> {
        self.objects.put(bucket, key, &data).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.objects.url(bucket, path)
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        self.objects.buckets().await
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        self.objects.list(bucket).await
    }
}
