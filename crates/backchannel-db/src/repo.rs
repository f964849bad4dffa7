//! Typed data-access operations used by the views and the HTTP endpoints.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use backchannel_types::models::{
    Attachment, Channel, Message, NewChannel, NewFile, NewMessage, NewReaction, Reaction,
};

use crate::{Backend, DataError, StoreError, keys};

/// Outcome of the storage self-check.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageReport {
    pub bucket: String,
    pub buckets: Vec<String>,
    pub bucket_found: bool,
    pub objects: Vec<String>,
}

/// A stored object and where to fetch it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedObject {
    pub path: String,
    pub url: String,
}

#[derive(Clone)]
pub struct Repo {
    backend: Arc<dyn Backend>,
    bucket: String,
}

impl Repo {
    pub fn new(backend: Arc<dyn Backend>, bucket: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // -- Channels --

    pub async fn get_channels(&self) -> Result<Vec<Channel>, DataError> {
        self.backend.select_channels().await.map_err(|e| {
            error!("Error fetching channels: {}", e);
            DataError::failed("Failed to fetch channels", e)
        })
    }

    pub async fn add_channel(&self, name: &str) -> Result<Channel, DataError> {
        debug!("Adding channel '{}'", name);
        let channel = self
            .backend
            .insert_channel(&NewChannel { name: name.to_string() })
            .await
            .map_err(|e| {
                error!("Error adding channel '{}': {}", name, e);
                DataError::failed("Failed to add channel", e)
            })?;

        info!("Channel '{}' added ({})", channel.name, channel.id);
        Ok(channel)
    }

    pub async fn delete_channel(&self, id: Uuid) -> Result<(), DataError> {
        self.backend.delete_channel(id).await.map_err(|e| {
            error!("Error deleting channel {}: {}", id, e);
            DataError::failed("Failed to delete channel", e)
        })?;
        info!("Channel {} deleted", id);
        Ok(())
    }

    // -- Messages --

    pub async fn get_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, DataError> {
        self.backend.select_messages(channel_id).await.map_err(|e| {
            error!("Error fetching messages for {}: {}", channel_id, e);
            DataError::failed("Failed to fetch messages", e)
        })
    }

    /// Upload the attachment (if any), insert the message, then record the
    /// file row. A failed file row is logged and the message is returned
    /// without it.
    pub async fn add_message(
        &self,
        channel_id: Uuid,
        username: &str,
        content: &str,
        attachment: Option<&Attachment>,
    ) -> Result<Message, DataError> {
        debug!(
            "Adding message to {} from {} (attachment: {})",
            channel_id,
            username,
            attachment.map(|a| a.name.as_str()).unwrap_or("none")
        );

        let uploaded = match attachment {
            Some(att) => Some((att, self.upload_file(att).await?)),
            None => None,
        };

        let mut message = self
            .backend
            .insert_message(&NewMessage {
                channel_id,
                username: username.to_string(),
                content: content.to_string(),
            })
            .await
            .map_err(|e| {
                error!("Error adding message: {}", e);
                DataError::failed("Failed to add message", e)
            })?;

        message.reactions.clear();
        message.files.clear();

        if let Some((att, url)) = uploaded {
            let new_file = NewFile {
                message_id: message.id,
                file_name: att.name.clone(),
                file_type: att.content_type.clone(),
                file_size: att.size() as i64,
                file_url: url,
            };
            match self.backend.insert_file(&new_file).await {
                Ok(file) => message.files.push(file),
                Err(e) => {
                    error!("Error recording file for message {}: {}", message.id, e);
                    warn!("File uploaded but metadata not saved in database");
                }
            }
        }

        info!("Message {} added to {}", message.id, channel_id);
        Ok(message)
    }

    // -- Reactions --

    /// `Ok(None)` when the reactions table does not exist.
    pub async fn add_reaction(
        &self,
        message_id: Uuid,
        user: &str,
        emoji: &str,
    ) -> Result<Option<Reaction>, DataError> {
        let new = NewReaction {
            message_id,
            user_id: user.to_string(),
            emoji: emoji.to_string(),
        };
        match self.backend.insert_reaction(&new).await {
            Ok(reaction) => {
                debug!("Reaction {} added to {}", reaction.emoji, message_id);
                Ok(Some(reaction))
            }
            Err(StoreError::MissingTable { .. }) => {
                warn!("Reactions table does not exist; reactions are unavailable");
                Ok(None)
            }
            Err(e) => {
                error!("Error adding reaction: {}", e);
                Err(DataError::failed("Failed to add reaction", e))
            }
        }
    }

    // -- Storage --

    /// Upload under a fresh collision-resistant key and return the public URL.
    pub async fn upload_file(&self, attachment: &Attachment) -> Result<String, DataError> {
        let uploaded = self
            .put_object(&keys::object_key(&attachment.name), &attachment.content_type, attachment.data.clone())
            .await?;
        info!("File '{}' uploaded to {}", attachment.name, uploaded.url);
        Ok(uploaded.url)
    }

    /// Store `data` under exactly `key` and resolve its public URL.
    pub async fn put_object(&self, key: &str, content_type: &str, data: Bytes) -> Result<UploadedObject, DataError> {
        let path = self
            .backend
            .upload_object(&self.bucket, key, content_type, data)
            .await
            .map_err(|e| {
                error!("Storage upload of '{}' failed: {}", key, e);
                match e {
                    StoreError::MissingBucket { bucket } => DataError::MissingBucket(bucket),
                    other => DataError::Upload(other.to_string()),
                }
            })?;
        let url = self.backend.public_url(&self.bucket, &path);
        Ok(UploadedObject { path, url })
    }

    /// List buckets, confirm ours exists and list what it holds.
    pub async fn check_storage(&self) -> Result<StorageReport, DataError> {
        let buckets = self
            .backend
            .list_buckets()
            .await
            .map_err(|e| DataError::failed("Failed to list buckets", e))?;
        info!("Available buckets: {:?}", buckets);

        let bucket_found = buckets.iter().any(|b| b == &self.bucket);
        let objects = if bucket_found {
            self.backend
                .list_objects(&self.bucket)
                .await
                .map_err(|e| DataError::failed("Failed to list files", e))?
        } else {
            warn!("Bucket '{}' not found", self.bucket);
            vec![]
        };

        Ok(StorageReport {
            bucket: self.bucket.clone(),
            buckets,
            bucket_found,
            objects,
        })
    }

    /// Upload a small text object to prove storage is writable.
    pub async fn test_upload(&self) -> Result<UploadedObject, DataError> {
        let uploaded = self
            .put_object(&keys::test_object_key(), "text/plain", Bytes::from_static(b"Hello, World!"))
            .await?;
        info!("Test object uploaded: {}", uploaded.url);
        Ok(uploaded)
    }
}
