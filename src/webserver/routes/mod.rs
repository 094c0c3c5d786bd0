use crate::webserver::state::AppState;
use axum::Router;
use std::sync::Arc;

pub mod status;
pub mod ws;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(ws::routes())
        .merge(status::routes())
        .with_state(state)
}
