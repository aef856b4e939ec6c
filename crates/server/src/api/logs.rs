//! Archived payload inspection endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::payload_log::{LogFileInfo, PayloadLog};
use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
}

/// GET /logs — archived files, newest first.
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LogFileInfo>>, ApiError> {
    state.payload_log.list().map(Json).map_err(internal_error)
}

#[derive(Deserialize)]
pub struct TailQuery {
    pub tail: Option<usize>,
}

/// GET /logs/{name}?tail=N — last N lines of an archived file.
pub async fn get_log(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<TailQuery>,
) -> Result<String, ApiError> {
    if !PayloadLog::is_safe_name(&name) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid log file path"})),
        ));
    }

    let lines = query.tail.unwrap_or(200).clamp(1, 5_000);
    match state.payload_log.tail(&name, lines) {
        Ok(Some(content)) => Ok(content),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Log file not found"})),
        )),
        Err(e) => Err(internal_error(e)),
    }
}
