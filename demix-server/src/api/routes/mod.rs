//! API route modules.

pub mod health;
pub mod jobs;
pub mod logging;
pub mod ws;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .nest("/api/logging", logging::router())
        .nest("/ws", ws::router())
        .with_state(state)
}
