use axum::Router;

use crate::ServiceState;

pub mod v1;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/v1", v1::router(state.clone()))
        .with_state(state)
}
