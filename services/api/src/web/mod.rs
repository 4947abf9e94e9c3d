//! services/api/src/web/mod.rs

pub mod rest;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;

/// Builds the API router. Shared between the binary and the integration
/// tests, which drive it with an in-memory store.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/resources/{resource_id}/sessions/start",
            post(rest::start_session_handler),
        )
        .route(
            "/resources/{resource_id}/sessions/end",
            post(rest::end_session_handler),
        )
        .route(
            "/resources/{resource_id}/sessions/active",
            get(rest::get_active_session_handler),
        )
        .route(
            "/sessions/{session_id}/page-change",
            post(rest::page_change_handler),
        )
        .route(
            "/resources/{resource_id}/progress",
            get(rest::get_progress_handler),
        )
        .route("/streak", get(rest::get_streak_handler))
        .route(
            "/goals",
            post(rest::create_goal_handler).get(rest::list_goals_handler),
        )
        .route(
            "/goals/{goal_id}/progress",
            post(rest::goal_progress_handler),
        )
        .with_state(app_state)
}

pub use rest::ApiDoc;
