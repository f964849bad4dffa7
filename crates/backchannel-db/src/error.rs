use thiserror::Error;

use backchannel_types::models::Table;

/// Failures reported by a [`crate::Backend`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Table {table} does not exist")]
    MissingTable { table: String },

    #[error("Storage bucket does not exist: {bucket}")]
    MissingBucket { bucket: String },

    #[error("Object already exists: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("No data returned when writing to {0}")]
    EmptyResponse(Table),

    #[error("{message} (status {status})")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_missing_table(&self) -> bool {
        matches!(self, Self::MissingTable { .. })
    }
}

/// What the data-access layer reports to the view. The variants map onto
/// the user-visible notice categories.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Failed to upload file: {0}")]
    Upload(String),

    #[error("Storage bucket does not exist: {0}")]
    MissingBucket(String),

    #[error("Reactions are not available")]
    ReactionsUnavailable,

    #[error("{0}")]
    Failed(String),
}

impl DataError {
    pub fn failed(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Failed(format!("{}: {}", context, err))
    }
}
