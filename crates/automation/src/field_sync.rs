//! Prepare, apply, and verify custom-field writes.
//!
//! ClickUp acknowledges field updates before they are consistently readable,
//! and dropdown writes in particular land late or not at all. Writes are
//! therefore paced, then re-read and compared; callers retry the subset that
//! failed verification.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use relay_clickup::fields::{format_field_value, resolve_dropdown_option};
use relay_clickup::model::CustomField;
use relay_clickup::ClickUpClient;
use relay_core::config::AutomationConfig;

/// A custom-field write prepared for a task.
///
/// For dropdowns, `value` already holds the resolved option ID.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub id: String,
    pub name: String,
    pub field_type: String,
    pub value: Value,
}

/// Select and normalize the parent fields configured for copying.
///
/// Null values are skipped (except checkboxes, where null means unchecked),
/// and dropdown values are resolved to option IDs. A dropdown value that
/// matches no configured option is logged and dropped rather than failing
/// the whole copy.
pub fn prepare_fields_for_update(
    parent_fields: &[CustomField],
    cfg: &AutomationConfig,
) -> Vec<FieldUpdate> {
    let mut updates = Vec::new();

    for field in parent_fields {
        if !cfg.copy_field_ids.contains(&field.id) {
            continue;
        }

        let value = field.value.clone().unwrap_or(Value::Null);
        if value.is_null() && field.field_type != "checkbox" {
            continue;
        }

        let value_to_set = if field.field_type == "drop_down" {
            match resolve_dropdown_option(field, &value) {
                Some(option_id) => Value::String(option_id),
                None => {
                    warn!(
                        field = %field.name,
                        field_id = %field.id,
                        value = %value,
                        "could not resolve dropdown option — field skipped"
                    );
                    continue;
                }
            }
        } else {
            value
        };

        updates.push(FieldUpdate {
            id: field.id.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            value: value_to_set,
        });
    }

    updates
}

/// Apply updates one by one, pausing between writes to stay under the API
/// rate limit. Returns `true` when every write was accepted.
pub async fn apply_field_updates(
    client: &ClickUpClient,
    task_id: &str,
    updates: &[FieldUpdate],
    delay: Duration,
) -> bool {
    let mut all_ok = true;

    for (i, update) in updates.iter().enumerate() {
        let value = format_field_value(&update.value, &update.field_type);
        match client.set_custom_field(task_id, &update.id, &value).await {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    field = %update.name,
                    field_type = %update.field_type,
                    "field updated"
                );
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    field = %update.name,
                    error = %e,
                    "field update rejected"
                );
                all_ok = false;
            }
        }

        if updates.len() > 1 && i + 1 < updates.len() {
            tokio::time::sleep(delay).await;
        }
    }

    all_ok
}

/// Re-fetch the task and check that each expected field actually holds its
/// new value. Returns overall success plus the subset that failed.
///
/// A failed task fetch fails verification for every expected field.
pub async fn verify_field_updates(
    client: &ClickUpClient,
    task_id: &str,
    expected: &[FieldUpdate],
) -> (bool, Vec<FieldUpdate>) {
    let task = match client.get_task(task_id).await {
        Ok(task) => task,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "could not fetch task for verification");
            return (false, expected.to_vec());
        }
    };

    let mut failed = Vec::new();

    for exp in expected {
        let current = match task.custom_field(&exp.id) {
            Some(f) => f,
            None => {
                warn!(
                    task_id = %task_id,
                    field = %exp.name,
                    "field missing from task after update"
                );
                failed.push(exp.clone());
                continue;
            }
        };
        let current_value = current.value.clone().unwrap_or(Value::Null);

        let matches = if exp.field_type == "drop_down" {
            // The raw value may come back as an orderindex, option object,
            // ID, or name; resolve before comparing IDs.
            let current_id = resolve_dropdown_option(current, &current_value);
            current_id.as_deref() == exp.value.as_str()
        } else {
            comparable(&format_field_value(&exp.value, &exp.field_type))
                == comparable(&format_field_value(&current_value, &current.field_type))
        };

        if matches {
            info!(task_id = %task_id, field = %exp.name, "field verified");
        } else {
            warn!(
                task_id = %task_id,
                field = %exp.name,
                expected = %exp.value,
                got = %current_value,
                "field verification failed"
            );
            failed.push(exp.clone());
        }
    }

    (failed.is_empty(), failed)
}

/// String form used for value comparison (unquoted for strings).
fn comparable(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
