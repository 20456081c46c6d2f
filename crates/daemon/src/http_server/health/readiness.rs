use std::path::Path;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::time::timeout;

use crate::ServiceState;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Ready once uploads have somewhere to stage their temp files.
#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Response {
    let tmp_dir = &state.uploader().config().tmp_dir;
    match timeout(HEALTH_CHECK_TIMEOUT, tmp_dir_ready(tmp_dir)).await {
        Ok(true) => {
            let msg = serde_json::json!({"status": "ok"});
            (StatusCode::OK, Json(msg)).into_response()
        }
        Ok(false) => {
            let msg = serde_json::json!({
                "status": "failure",
                "message": "tmp dir is not available"
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(msg)).into_response()
        }
        Err(_) => {
            let msg = serde_json::json!({
                "status": "failure",
                "message": "health check timed out"
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(msg)).into_response()
        }
    }
}

async fn tmp_dir_ready(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_dir(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "tmp dir check failed");
            false
        }
    }
}
