//! HTTP routing.

mod health;

use axum::Router;

use crate::state::AppState;

/// Create the router with health and metrics endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new().merge(health::routes()).with_state(state)
}
