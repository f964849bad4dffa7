//! Backend over the hosted provider's HTTP APIs (PostgREST tables and the
//! storage service).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use uuid::Uuid;

use backchannel_types::models::{
    Channel, FileRecord, Message, NewChannel, NewFile, NewMessage, NewReaction, Reaction, Table,
};

use crate::{Backend, StoreError};

/// PostgreSQL "undefined table" and the PostgREST schema-cache equivalent.
const MISSING_TABLE_CODES: &[&str] = &["42P01", "PGRST205"];

const MESSAGE_SELECT: &str = "*,reactions(*),files(*)";

pub struct RestBackend {
    http: Client,
    base: Url,
}

/// Error body returned by the table API.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

/// Error body returned by the storage API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageError {
    status_code: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedObject {
    #[serde(rename = "Key")]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

impl RestBackend {
    /// `base_url` is the project URL; `api_key` is sent as both `apikey`
    /// and bearer token.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let base = Url::parse(base_url).map_err(|e| StoreError::Internal(format!("Invalid provider URL: {}", e)))?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| StoreError::Internal("API key is not a valid header value".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| StoreError::Internal("API key is not a valid header value".into()))?;
        headers.insert("apikey", key);
        headers.insert(header::AUTHORIZATION, bearer);

        let http = Client::builder().default_headers(headers).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Internal("Provider URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: Table) -> Result<Url, StoreError> {
        self.endpoint(&["rest", "v1", table.as_str()])
    }

    async fn select<T: DeserializeOwned>(&self, table: Table, query: &[(&str, String)]) -> Result<Vec<T>, StoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        read_json(resp, table).await
    }

    /// Insert one row and return it as stored.
    async fn insert<B, T>(&self, table: Table, body: &B) -> Result<T, StoreError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.table_url(table)?;
        let req = self
            .http
            .post(url)
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = send_json(req, table).await?;
        rows.into_iter().next().ok_or(StoreError::EmptyResponse(table))
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select_channels(&self) -> Result<Vec<Channel>, StoreError> {
        self.select(
            Table::Channels,
            &[("select", "*".into()), ("order", "created_at.asc".into())],
        )
        .await
    }

    async fn insert_channel(&self, new: &NewChannel) -> Result<Channel, StoreError> {
        self.insert(Table::Channels, new).await
    }

    async fn delete_channel(&self, id: Uuid) -> Result<(), StoreError> {
        let mut url = self.table_url(Table::Channels)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
        let resp = self.http.delete(url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(table_error(resp, Table::Channels).await)
        }
    }

    async fn select_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.select(
            Table::Messages,
            &[
                ("select", MESSAGE_SELECT.into()),
                ("channel_id", format!("eq.{}", channel_id)),
                ("order", "created_at.asc".into()),
            ],
        )
        .await
    }

    async fn insert_message(&self, new: &NewMessage) -> Result<Message, StoreError> {
        self.insert(Table::Messages, new).await
    }

    async fn insert_reaction(&self, new: &NewReaction) -> Result<Reaction, StoreError> {
        self.insert(Table::Reactions, new).await
    }

    async fn insert_file(&self, new: &NewFile) -> Result<FileRecord, StoreError> {
        self.insert(Table::Files, new).await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, StoreError> {
        let url = self.endpoint(&["storage", "v1", "object", bucket, key])?;
        let resp = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(storage_error(resp, bucket).await);
        }

        let uploaded: UploadedObject = resp.json().await?;
        // `Key` is reported as "{bucket}/{path}".
        let path = uploaded
            .key
            .as_deref()
            .and_then(|k| k.strip_prefix(bucket))
            .map(|k| k.trim_start_matches('/').to_string())
            .unwrap_or_else(|| key.to_string());
        Ok(path)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        let mut segments = vec!["storage", "v1", "object", "public", bucket];
        segments.extend(path.split('/'));
        match self.endpoint(&segments) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}/storage/v1/object/public/{}/{}", self.base.as_str().trim_end_matches('/'), bucket, path),
        }
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        let url = self.endpoint(&["storage", "v1", "bucket"])?;
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(storage_error(resp, "").await);
        }
        let buckets: Vec<BucketEntry> = resp.json().await?;
        Ok(buckets.into_iter().map(|b| b.name).collect())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let url = self.endpoint(&["storage", "v1", "object", "list", bucket])?;
        let body = serde_json::json!({
            "prefix": "",
            "limit": 100,
            "offset": 0,
            "sortBy": { "column": "name", "order": "asc" },
        });
        let resp = self.http.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(storage_error(resp, bucket).await);
        }
        let objects: Vec<ObjectEntry> = resp.json().await?;
        Ok(objects.into_iter().map(|o| o.name).collect())
    }
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder, table: Table) -> Result<T, StoreError> {
    let resp = req.send().await?;
    read_json(resp, table).await
}

async fn read_json<T: DeserializeOwned>(resp: Response, table: Table) -> Result<T, StoreError> {
    if !resp.status().is_success() {
        return Err(table_error(resp, table).await);
    }
    Ok(resp.json().await?)
}

async fn table_error(resp: Response, table: Table) -> StoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let err = classify_table_error(status, &body, table);
    error!("Provider error on {}: {}", table, err);
    err
}

async fn storage_error(resp: Response, bucket: &str) -> StoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let err = classify_storage_error(status, &body, bucket);
    error!("Storage error on bucket '{}': {}", bucket, err);
    err
}

fn classify_table_error(status: StatusCode, body: &str, table: Table) -> StoreError {
    let parsed: Option<PostgrestError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code.clone());
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| fallback_message(status, body));

    if code.as_deref().is_some_and(|c| MISSING_TABLE_CODES.contains(&c)) {
        return StoreError::MissingTable { table: table.to_string() };
    }

    StoreError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

fn classify_storage_error(status: StatusCode, body: &str, bucket: &str) -> StoreError {
    let parsed: Option<StorageError> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|e| e.error.clone());
    let message = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| fallback_message(status, body));

    let bucket_missing = [error.as_deref(), Some(message.as_str())]
        .into_iter()
        .flatten()
        .any(|m| m.eq_ignore_ascii_case("Bucket not found"));
    if bucket_missing {
        return StoreError::MissingBucket { bucket: bucket.to_string() };
    }

    if status == StatusCode::CONFLICT || error.as_deref() == Some("Duplicate") {
        return StoreError::Conflict(message);
    }

    let status = parsed
        .and_then(|e| e.status_code)
        .and_then(|s| s.parse().ok())
        .unwrap_or(status.as_u16());
    StoreError::Api {
        status,
        code: error,
        message,
    }
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        body.trim().to_string()
    }
}
