//! Record-only automations: events we archive but take no remote action on.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use relay_core::error::RelayError;

/// Append a created-task record to the rolling `task_created.json` array.
///
/// The file is read-modify-written; an unreadable or corrupt file starts a
/// fresh array rather than blocking the record.
pub fn record_task_created(dir: &Path, task: &Value) -> Result<PathBuf, RelayError> {
    fs::create_dir_all(dir)?;
    let path = dir.join("task_created.json");

    let mut entries: Vec<Value> = match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    entries.push(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "task": task,
    }));

    let serialized = serde_json::to_string_pretty(&entries)
        .map_err(|e| RelayError::Serialize(e.to_string()))?;
    fs::write(&path, serialized)?;

    info!(path = %path.display(), entries = entries.len(), "task creation recorded");
    Ok(path)
}

/// Snapshot a custom-field change into its own timestamped file.
pub fn record_custom_field_changed(
    dir: &Path,
    task: &Value,
    history_items: &[Value],
) -> Result<PathBuf, RelayError> {
    fs::create_dir_all(dir)?;
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%6f").to_string();
    let path = dir.join(format!("custom_field_change_{timestamp}.json"));

    let record = json!({
        "timestamp": timestamp,
        "task": task,
        "history_items": history_items,
    });
    let serialized = serde_json::to_string_pretty(&record)
        .map_err(|e| RelayError::Serialize(e.to_string()))?;
    fs::write(&path, serialized)?;

    info!(path = %path.display(), "custom field change recorded");
    Ok(path)
}
