use std::path::PathBuf;

use bytes::Bytes;
use reqwest::Url;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::StoreError;

/// Filesystem object storage: one directory per bucket, one file per key.
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub async fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        info!("Object storage directory: {}", root.display());
        Ok(Self { root })
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        validate_name(bucket)?;
        fs::create_dir_all(self.root.join(bucket)).await?;
        Ok(())
    }

    pub async fn buckets(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write a new object. Existing keys are never overwritten.
    pub async fn put(&self, bucket: &str, key: &str, data: &Bytes) -> Result<String, StoreError> {
        validate_name(key)?;
        let dir = self.bucket_dir(bucket).await?;

        let path = dir.join(key);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Conflict(format!("{}/{}", bucket, key)));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(data).await?;
        file.flush().await?;

        debug!(bucket, key, size = data.len(), "Stored object");
        Ok(key.to_string())
    }

    pub async fn list(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.bucket_dir(bucket).await?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_name(key)?;
        let path = self.bucket_dir(bucket).await?.join(key);
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `file://` URL of an object.
    pub fn url(&self, bucket: &str, key: &str) -> String {
        let path = self.root.join(bucket).join(key);
        Url::from_file_path(&path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", path.display()))
    }

    async fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        validate_name(bucket)?;
        let dir = self.root.join(bucket);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(StoreError::MissingBucket {
                bucket: bucket.to_string(),
            }),
        }
    }
}

/// Bucket names and keys are single path components.
fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).await.unwrap();
        store.create_bucket("files").await.unwrap();

        let data = Bytes::from_static(b"Hello, World!");
        let path = store.put("files", "1-a.txt", &data).await.unwrap();
        assert_eq!(path, "1-a.txt");
        assert_eq!(store.list("files").await.unwrap(), vec!["1-a.txt".to_string()]);
        assert_eq!(store.read("files", "1-a.txt").await.unwrap(), b"Hello, World!");
        assert!(store.url("files", "1-a.txt").starts_with("file://"));
    }

    #[tokio::test]
    async fn existing_key_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).await.unwrap();
        store.create_bucket("files").await.unwrap();

        let data = Bytes::from_static(b"x");
        store.put("files", "same.txt", &data).await.unwrap();
        assert!(matches!(
            store.put("files", "same.txt", &data).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn missing_bucket_and_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).await.unwrap();
        let data = Bytes::from_static(b"x");

        assert!(matches!(
            store.put("nope", "a.txt", &data).await,
            Err(StoreError::MissingBucket { .. })
        ));

        store.create_bucket("files").await.unwrap();
        assert!(matches!(
            store.put("files", "../escape.txt", &data).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert_eq!(store.buckets().await.unwrap(), vec!["files".to_string()]);
    }
}
