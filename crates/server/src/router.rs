//! HTTP router construction.
//!
//! Assembles all axum routes and middleware into a single `Router`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/scheduler/status", get(api::health::scheduler_status))
        .route("/webhook/status-change", post(api::webhooks::status_change))
        .route("/webhook/task-created", post(api::webhooks::task_created))
        .route(
            "/webhook/subtask-created",
            post(api::webhooks::subtask_created),
        )
        .route(
            "/webhook/subtask-status-changed",
            post(api::webhooks::subtask_status_changed),
        )
        // Legacy alias kept for webhooks registered before the /webhook
        // prefix was introduced.
        .route(
            "/subtask-status-changed",
            post(api::webhooks::subtask_status_changed),
        )
        .route(
            "/webhook/custom-field-changed",
            post(api::webhooks::custom_field_changed),
        )
        .route("/logs", get(api::logs::list_logs))
        .route("/logs/{name}", get(api::logs::get_log))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
