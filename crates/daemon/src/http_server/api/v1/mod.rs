use axum::routing::post;
use axum::Router;

use crate::http_server::health;
use crate::ServiceState;

pub mod upload;

pub use upload::{UploadRequestError, UploadResponse, FILE_FIELD};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/upload", post(upload::handler))
        .merge(health::router(state.clone()))
        .with_state(state)
}
