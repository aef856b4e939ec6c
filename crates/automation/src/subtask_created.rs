//! Parent → subtask custom-field copy, triggered when subtasks are created.

use std::time::Duration;

use tracing::{info, warn};

use relay_clickup::{ClickUpClient, ClickUpError};
use relay_core::config::AutomationConfig;

use crate::field_sync::{
    apply_field_updates, prepare_fields_for_update, verify_field_updates, FieldUpdate,
};

/// Result summary of one field-copy sweep.
#[derive(Debug)]
pub struct FieldCopyOutcome {
    pub fields_prepared: usize,
    pub subtasks_total: usize,
    pub subtasks_synced: usize,
    pub verified: bool,
}

/// Copy the configured custom fields from a parent task onto its subtasks.
///
/// Runs as a sweep over all current subtasks of the parent rather than the
/// single subtask named in a webhook: creations arrive in bursts that
/// coalesce into one run per parent, and the run must cover every subtask
/// created in the burst. Subtasks whose fields already match are left
/// untouched, so the sweep is idempotent and cheap for the already-synced
/// majority.
pub async fn handle_subtask_created(
    client: &ClickUpClient,
    cfg: &AutomationConfig,
    parent_task_id: &str,
) -> Result<FieldCopyOutcome, ClickUpError> {
    info!(parent_task_id = %parent_task_id, "syncing parent fields to subtasks");

    let parent = client.get_task_with_subtasks(parent_task_id).await?;
    let updates = prepare_fields_for_update(&parent.custom_fields, cfg);

    if updates.is_empty() {
        info!(parent_task_id = %parent_task_id, "no fields to copy after preparation");
        return Ok(FieldCopyOutcome {
            fields_prepared: 0,
            subtasks_total: parent.subtasks.len(),
            subtasks_synced: 0,
            verified: true,
        });
    }
    if parent.subtasks.is_empty() {
        info!(parent_task_id = %parent_task_id, "parent has no subtasks");
        return Ok(FieldCopyOutcome {
            fields_prepared: updates.len(),
            subtasks_total: 0,
            subtasks_synced: 0,
            verified: true,
        });
    }

    let mut synced = 0;
    let mut all_verified = true;

    for subtask in &parent.subtasks {
        // Verify-first: already-synced subtasks cost one read, no writes.
        let (in_sync, missing) = verify_field_updates(client, &subtask.id, &updates).await;
        if in_sync {
            continue;
        }

        let verified = sync_subtask(client, cfg, &subtask.id, &missing).await;
        synced += 1;
        all_verified &= verified;
    }

    info!(
        parent_task_id = %parent_task_id,
        subtasks = parent.subtasks.len(),
        synced,
        verified = all_verified,
        "field sync finished"
    );

    Ok(FieldCopyOutcome {
        fields_prepared: updates.len(),
        subtasks_total: parent.subtasks.len(),
        subtasks_synced: synced,
        verified: all_verified,
    })
}

/// Apply and verify the missing fields on one subtask, retrying failed
/// dropdowns. Dropdown writes are the flaky ones; other field types either
/// stick on the first write or fail deterministically.
async fn sync_subtask(
    client: &ClickUpClient,
    cfg: &AutomationConfig,
    subtask_id: &str,
    missing: &[FieldUpdate],
) -> bool {
    let delay = Duration::from_millis(cfg.field_update_delay_ms);

    if !apply_field_updates(client, subtask_id, missing, delay).await {
        warn!(subtask_id = %subtask_id, "some field updates were rejected on first attempt");
    }

    let (verified, failed) = verify_field_updates(client, subtask_id, missing).await;
    if verified {
        return true;
    }

    // Only dropdowns are worth retrying; other failed types stay failed.
    let had_non_dropdown_failures = failed.iter().any(|f| f.field_type != "drop_down");
    let mut pending: Vec<_> = failed
        .into_iter()
        .filter(|f| f.field_type == "drop_down")
        .collect();
    let retry_delay = Duration::from_millis(cfg.dropdown_retry_delay_ms);

    let mut attempt = 0;
    while !pending.is_empty() && attempt < cfg.dropdown_retry_limit {
        attempt += 1;
        info!(
            subtask_id = %subtask_id,
            attempt,
            fields = pending.len(),
            "retrying failed dropdown fields"
        );
        tokio::time::sleep(retry_delay).await;

        apply_field_updates(client, subtask_id, &pending, delay).await;
        let (_, still_failed) = verify_field_updates(client, subtask_id, &pending).await;
        pending = still_failed;
    }

    let ok = pending.is_empty() && !had_non_dropdown_failures;
    if !ok {
        warn!(
            subtask_id = %subtask_id,
            unresolved = pending.len(),
            "field copy finished with unverified fields"
        );
    }
    ok
}
