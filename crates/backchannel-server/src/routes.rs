//! Upload endpoints backed by the admin-keyed repository.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
};
use tracing::{error, info, warn};

use backchannel_db::Repo;
use backchannel_types::api::{TestUploadResponse, UploadResponse};
use backchannel_types::models::{Attachment, MAX_ATTACHMENT_BYTES};

use crate::error::ApiError;

/// Room for multipart framing on top of the largest accepted file.
const BODY_LIMIT: usize = MAX_ATTACHMENT_BYTES + 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub repo: Repo,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/test-upload", get(test_upload))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// POST /api/upload: multipart field `file`, stored under a fresh key.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("file").to_string();
        let file_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await?;

        if data.len() > MAX_ATTACHMENT_BYTES {
            warn!(size = data.len(), "Rejected oversized upload '{}'", file_name);
            return Err(ApiError::TooLarge);
        }

        let attachment = Attachment::new(file_name, file_type, data);
        let url = state.repo.upload_file(&attachment).await.map_err(|e| {
            error!("Error uploading file: {}", e);
            e
        })?;

        info!(size = attachment.size(), "Uploaded '{}'", attachment.name);
        return Ok(Json(UploadResponse {
            success: true,
            url,
            file_size: attachment.size() as u64,
            file_name: attachment.name,
            file_type: attachment.content_type,
        }));
    }

    Err(ApiError::NoFile)
}

/// GET /api/test-upload: writes a small text object to prove storage works.
pub async fn test_upload(State(state): State<AppState>) -> Result<Json<TestUploadResponse>, ApiError> {
    let uploaded = state.repo.test_upload().await.map_err(|e| {
        error!("Server-side upload test failed: {}", e);
        e
    })?;

    Ok(Json(TestUploadResponse {
        success: true,
        path: uploaded.path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::Value;
    use tower::ServiceExt;

    use backchannel_db::LocalBackend;

    const BOUNDARY: &str = "backchannel-test-boundary";

    async fn app(dir: &std::path::Path, bucket: &str) -> (Router, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::ephemeral(dir, "files").await.unwrap());
        let state = AppState {
            repo: Repo::new(backend.clone(), bucket),
        };
        (router(state), backend)
    }

    fn multipart_request(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_stores_file_and_returns_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (app, backend) = app(dir.path(), "files").await;

        let response = app
            .oneshot(multipart_request("file", "notes.txt", "text/plain", b"hello there"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["fileName"], "notes.txt");
        assert_eq!(body["fileType"], "text/plain");
        assert_eq!(body["fileSize"], 11);
        assert!(body["url"].as_str().unwrap().ends_with(".txt"));

        let objects = backend.objects().list("files").await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(backend.objects().read("files", &objects[0]).await.unwrap(), b"hello there");
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path(), "files").await;

        let response = app
            .oneshot(multipart_request("avatar", "a.png", "image/png", b"png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No file provided");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (app, backend) = app(dir.path(), "files").await;

        let data = vec![b'x'; MAX_ATTACHMENT_BYTES + 1];
        let response = app
            .oneshot(multipart_request("file", "big.bin", "application/octet-stream", &data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(backend.objects().list("files").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_to_missing_bucket_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path(), "no-such-bucket").await;

        let response = app
            .oneshot(multipart_request("file", "a.txt", "text/plain", b"a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_upload_writes_hello_world() {
        let dir = tempfile::tempdir().unwrap();
        let (app, backend) = app(dir.path(), "files").await;

        let response = app
            .oneshot(Request::get("/api/test-upload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        let path = body["path"].as_str().unwrap();
        assert!(path.starts_with("test-") && path.ends_with(".txt"));
        assert_eq!(backend.objects().read("files", path).await.unwrap(), b"Hello, World!");
    }
}
