use serde::{Deserialize, Serialize};

// -- POST /api/upload --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

// -- GET /api/test-upload --

#[derive(Debug, Serialize, Deserialize)]
pub struct TestUploadResponse {
    pub success: bool,
    pub path: String,
}

/// Body returned by both endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
