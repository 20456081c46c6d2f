use axum::routing::get;
use axum::Router;

use crate::ServiceState;

mod readiness;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/health", get(readiness::handler))
        .with_state(state)
}
