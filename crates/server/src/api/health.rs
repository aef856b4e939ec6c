//! Health and scheduler status endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub clickup_configured: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        clickup_configured: state.clickup.is_some(),
    })
}

#[derive(Serialize)]
pub struct SchedulerStatusResponse {
    /// Keys with a live coalescing worker right now.
    pub active_keys: usize,
    /// Concurrency permits not held by running jobs.
    pub available_permits: usize,
    pub max_concurrent_keys: usize,
    pub debounce_ms: u64,
    pub idle_timeout_ms: u64,
}

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatusResponse> {
    let config = state.scheduler.config();
    Json(SchedulerStatusResponse {
        active_keys: state.scheduler.active_keys(),
        available_permits: state.scheduler.available_permits(),
        max_concurrent_keys: config.max_concurrent_keys,
        debounce_ms: config.debounce_window.as_millis() as u64,
        idle_timeout_ms: config.idle_timeout.as_millis() as u64,
    })
}
