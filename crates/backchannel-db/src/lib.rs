pub mod config;
pub mod error;
pub mod keys;
pub mod local;
pub mod repo;
pub mod rest;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use backchannel_types::models::{Channel, FileRecord, Message, NewChannel, NewFile, NewMessage, NewReaction, Reaction};

pub use config::{ConfigError, Provider, ProviderConfig};
pub use error::{DataError, StoreError};
pub use local::LocalBackend;
pub use repo::Repo;
pub use rest::RestBackend;

/// Storage bucket used when none is configured.
pub const DEFAULT_BUCKET: &str = "discord-clone-files";

/// The provider surface: table reads/writes and object storage.
/// Implementations return rows exactly as the store holds them.
#[async_trait]
pub trait Backend: Send + Sync {
    /// All channels, oldest first.
    async fn select_channels(&self) -> Result<Vec<Channel>, StoreError>;

    async fn insert_channel(&self, new: &NewChannel) -> Result<Channel, StoreError>;

    async fn delete_channel(&self, id: Uuid) -> Result<(), StoreError>;

    /// Messages of one channel with their reactions and files, oldest first.
    async fn select_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, StoreError>;

    async fn insert_message(&self, new: &NewMessage) -> Result<Message, StoreError>;

    async fn insert_reaction(&self, new: &NewReaction) -> Result<Reaction, StoreError>;

    async fn insert_file(&self, new: &NewFile) -> Result<FileRecord, StoreError>;

    /// Store an object under `key` without overwriting. Returns the stored path.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, StoreError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn list_buckets(&self) -> Result<Vec<String>, StoreError>;

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError>;
}
