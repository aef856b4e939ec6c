//! Webhook intake handlers.
//!
//! Every handler follows the same discipline: archive the raw payload first,
//! validate, enqueue the matching automation on the coalescing scheduler,
//! and answer immediately — the job runs after the handler has returned.
//!
//! Payloads we can never act on (missing IDs, unconfigured API client) get
//! a 200 "skipped": ClickUp redelivers non-2xx webhooks, and redelivering an
//! unusable payload only produces the same skip again.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use relay_automation::audit;
use relay_automation::{
    handle_status_changed, handle_subtask_created, handle_subtask_status_changed,
};
use relay_clickup::ClickUpClient;
use relay_core::WebhookEnvelope;

use crate::payload_log::{archive_best_effort, PayloadLog};
use crate::state::AppState;

type ApiResponse = (StatusCode, Json<Value>);

fn invalid_json() -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "message": "Invalid JSON payload"})),
    )
}

fn skipped(reason: &str, received: Value) -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({"status": "skipped", "reason": reason, "received_data": received})),
    )
}

fn enqueue_failed(e: impl std::fmt::Display) -> ApiResponse {
    warn!(error = %e, "enqueue rejected");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"status": "error", "message": e.to_string()})),
    )
}

/// The configured ClickUp client, or the skip response to return without one.
fn require_clickup(state: &AppState) -> Result<Arc<ClickUpClient>, ApiResponse> {
    state
        .clickup
        .clone()
        .ok_or_else(|| skipped("clickup not configured", Value::Null))
}

/// Extract a task ID that may arrive as a string or a number.
fn id_from(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── POST /webhook/status-change ───────────────────────────────────

/// A task's status changed: propagate it to the task's subtasks,
/// coalesced by task.
pub async fn status_change(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(raw)) = body else {
        return invalid_json();
    };
    archive_best_effort(&state.payload_log, "status_change", &raw);
    let timestamp = PayloadLog::timestamp();

    let envelope = match WebhookEnvelope::from_value(&raw) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "unparseable status-change payload");
            let _ = state
                .payload_log
                .save_error("status_change", &e.to_string(), &raw);
            return invalid_json();
        }
    };

    let (Some(task_id), Some(status)) = (envelope.task_id(), envelope.status_name()) else {
        warn!("missing task_id or status in status-change webhook");
        return skipped(
            "missing task_id or status",
            json!({"task_id": envelope.task_id(), "status": envelope.status_name()}),
        );
    };

    let client = match require_clickup(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    info!(task_id = %task_id, status = %status, "status change received");

    let key = task_id.to_string();
    let job_key = key.clone();
    let result = state.scheduler.enqueue(key.clone(), move || {
        let client = client.clone();
        let task_id = job_key.clone();
        async move {
            handle_status_changed(&client, &task_id).await?;
            Ok(())
        }
        .boxed()
    });
    if let Err(e) = result {
        return enqueue_failed(e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "scheduled",
            "task_id": key,
            "new_status": status,
            "timestamp": timestamp,
        })),
    )
}

// ── POST /webhook/subtask-created ─────────────────────────────────

/// A subtask was created: sync the parent's custom fields onto its
/// subtasks, coalesced by parent.
pub async fn subtask_created(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(raw)) = body else {
        return invalid_json();
    };
    archive_best_effort(&state.payload_log, "subtask_created", &raw);
    let timestamp = PayloadLog::timestamp();

    let envelope = match WebhookEnvelope::from_value(&raw) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "unparseable subtask-created payload");
            let _ = state
                .payload_log
                .save_error("subtask_created", &e.to_string(), &raw);
            return invalid_json();
        }
    };

    let (Some(subtask_id), Some(parent_task_id)) = (envelope.task_id(), envelope.parent_id())
    else {
        warn!("missing subtask_id or parent_task_id in subtask-created webhook");
        return skipped(
            "missing subtask_id or parent_task_id",
            json!({"subtask_id": envelope.task_id(), "parent_task_id": envelope.parent_id()}),
        );
    };

    let client = match require_clickup(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    info!(subtask_id = %subtask_id, parent_task_id = %parent_task_id, "subtask created");

    let subtask_id = subtask_id.to_string();
    let parent = parent_task_id.to_string();
    let job_parent = parent.clone();
    let automation_cfg = state.config.automation.clone();
    let result = state.scheduler.enqueue(parent.clone(), move || {
        let client = client.clone();
        let cfg = automation_cfg.clone();
        let parent = job_parent.clone();
        async move {
            handle_subtask_created(&client, &cfg, &parent).await?;
            Ok(())
        }
        .boxed()
    });
    if let Err(e) = result {
        return enqueue_failed(e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "scheduled",
            "subtask_id": subtask_id,
            "parent_task_id": parent,
            "timestamp": timestamp,
        })),
    )
}

// ── POST /webhook/subtask-status-changed ──────────────────────────

/// A subtask's status changed: recompute the parent's total parts cost,
/// coalesced by parent.
pub async fn subtask_status_changed(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(raw)) = body else {
        return invalid_json();
    };
    archive_best_effort(&state.payload_log, "subtask_status_changed", &raw);
    let timestamp = PayloadLog::timestamp();

    let envelope = match WebhookEnvelope::from_value(&raw) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "unparseable subtask-status-changed payload");
            let _ = state
                .payload_log
                .save_error("subtask_status_changed", &e.to_string(), &raw);
            return invalid_json();
        }
    };

    let (Some(subtask_id), Some(parent_task_id)) = (envelope.task_id(), envelope.parent_id())
    else {
        warn!("missing subtask_id or parent_task_id in subtask-status-changed webhook");
        return skipped(
            "missing subtask_id or parent_task_id",
            json!({"subtask_id": envelope.task_id(), "parent_task_id": envelope.parent_id()}),
        );
    };

    let client = match require_clickup(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    info!(
        subtask_id = %subtask_id,
        parent_task_id = %parent_task_id,
        "subtask status changed"
    );

    let subtask_id = subtask_id.to_string();
    let parent = parent_task_id.to_string();
    let job_parent = parent.clone();
    let automation_cfg = state.config.automation.clone();
    let result = state.scheduler.enqueue(parent.clone(), move || {
        let client = client.clone();
        let cfg = automation_cfg.clone();
        let parent = job_parent.clone();
        async move {
            handle_subtask_status_changed(&client, &cfg, &parent).await?;
            Ok(())
        }
        .boxed()
    });
    if let Err(e) = result {
        return enqueue_failed(e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "scheduled",
            "subtask_id": subtask_id,
            "parent_task_id": parent,
            "timestamp": timestamp,
        })),
    )
}

// ── POST /webhook/task-created ────────────────────────────────────

/// A task was created: record it. Only top-level tasks are recorded;
/// subtask creations are covered by the subtask-created route.
pub async fn task_created(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(raw)) = body else {
        return invalid_json();
    };
    archive_best_effort(&state.payload_log, "task_created", &raw);
    let timestamp = PayloadLog::timestamp();

    let event = raw.get("event").and_then(Value::as_str);
    let task = raw.get("task").cloned().unwrap_or_else(|| json!({}));
    let has_parent = task
        .get("parent")
        .and_then(Value::as_str)
        .map(|s| !s.is_empty())
        .unwrap_or(false);

    if event != Some("taskCreated") || has_parent {
        return (StatusCode::OK, Json(json!({"status": "received"})));
    }

    let Some(task_id) = id_from(task.get("id")) else {
        return skipped("missing task id", Value::Null);
    };

    info!(task_id = %task_id, "task created");

    let dir = state.payload_log.dir().to_path_buf();
    let result = state.scheduler.enqueue(task_id.clone(), move || {
        let dir = dir.clone();
        let task = task.clone();
        async move {
            audit::record_task_created(&dir, &task)?;
            Ok(())
        }
        .boxed()
    });
    if let Err(e) = result {
        return enqueue_failed(e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "scheduled",
            "task_id": task_id,
            "timestamp": timestamp,
        })),
    )
}

// ── POST /webhook/custom-field-changed ────────────────────────────

/// A custom field changed on a task: snapshot the change. Fires only for
/// `taskUpdated` events whose history actually touches a custom field.
pub async fn custom_field_changed(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(raw)) = body else {
        return invalid_json();
    };
    archive_best_effort(&state.payload_log, "custom_field_raw", &raw);
    let timestamp = PayloadLog::timestamp();

    let event = raw.get("event").and_then(Value::as_str);
    let task = raw.get("task").cloned().unwrap_or_else(|| json!({}));
    let history_items: Vec<Value> = raw
        .get("history_items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let touches_custom_field = history_items
        .iter()
        .any(|item| item.get("field").and_then(Value::as_str) == Some("custom_field"));

    if event != Some("taskUpdated") || !touches_custom_field {
        return (StatusCode::OK, Json(json!({"status": "received"})));
    }

    let Some(task_id) = id_from(task.get("id")) else {
        return skipped("missing task id", Value::Null);
    };

    info!(task_id = %task_id, changes = history_items.len(), "custom field changed");

    let dir = state.payload_log.dir().to_path_buf();
    let result = state.scheduler.enqueue(task_id.clone(), move || {
        let dir = dir.clone();
        let task = task.clone();
        let history_items = history_items.clone();
        async move {
            audit::record_custom_field_changed(&dir, &task, &history_items)?;
            Ok(())
        }
        .boxed()
    });
    if let Err(e) = result {
        return enqueue_failed(e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "scheduled",
            "task_id": task_id,
            "timestamp": timestamp,
        })),
    )
}
