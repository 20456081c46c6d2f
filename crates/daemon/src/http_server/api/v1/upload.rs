use std::io;

use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use common::prelude::{UploadError, UploadResult};

use crate::ServiceState;

/// Multipart field carrying the content to upload
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Root of the UnixFS DAG
    pub root: String,
    /// First shard holding the DAG
    pub shard: Option<String>,
    /// Every shard, in upload order
    pub shards: Vec<String>,
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            root: result.root.to_string(),
            shard: result.shard().map(ToString::to_string),
            shards: result.shards.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Stream the `file` field of a multipart form through the upload pipeline.
///
/// Other fields are skipped. The first `file` field is uploaded and the
///  rest of the form is ignored.
pub async fn handler(
    State(state): State<ServiceState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, UploadRequestError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Multipart parsing error: {}", e);
        UploadRequestError::MultipartError(e.to_string())
    })? {
        if field.name() != Some(FILE_FIELD) {
            tracing::warn!(field = ?field.name(), "Ignoring unknown field");
            continue;
        }

        let filename = field.file_name().unwrap_or("unnamed").to_string();
        tracing::info!(%filename, "Uploading file");

        let stream = field.map_err(|e| io::Error::other(e.to_string()));
        let result = state.uploader().upload(stream).await.map_err(|e| {
            tracing::error!(%filename, error = %e, "Upload failed");
            e
        })?;

        tracing::info!(
            %filename,
            root = %result.root,
            shards = result.shards.len(),
            "Upload complete"
        );
        return Ok((StatusCode::OK, Json(UploadResponse::from(result))));
    }

    Err(UploadRequestError::InvalidRequest(format!(
        "{FILE_FIELD} is required"
    )))
}

#[derive(Debug, thiserror::Error)]
pub enum UploadRequestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Multipart error: {0}")]
    MultipartError(String),
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

impl IntoResponse for UploadRequestError {
    fn into_response(self) -> Response {
        match self {
            UploadRequestError::InvalidRequest(msg) | UploadRequestError::MultipartError(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Bad request: {}", msg),
            )
                .into_response(),
            UploadRequestError::Upload(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unexpected error".to_string(),
            )
                .into_response(),
        }
    }
}
