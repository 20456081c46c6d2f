use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Fallback for unknown routes, answering in JSON when the client asks for it.
pub async fn not_found_handler(headers: HeaderMap) -> Response {
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        let err_msg = serde_json::json!({"msg": "not found"});
        (StatusCode::NOT_FOUND, Json(err_msg)).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            [(CONTENT_TYPE, "text/plain")],
            "not found",
        )
            .into_response()
    }
}
