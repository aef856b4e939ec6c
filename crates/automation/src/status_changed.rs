//! Parent status propagated to every subtask.

use futures::future::join_all;
use tracing::{info, warn};

use relay_clickup::{ClickUpClient, ClickUpError};

/// Result summary of one propagation run.
#[derive(Debug)]
pub struct StatusPropagation {
    pub status: Option<String>,
    pub subtask_count: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Push a parent task's current status onto all of its subtasks.
///
/// The status is read from the task at run time, not from the webhook that
/// triggered the run: coalesced bursts (several status flips in quick
/// succession) must propagate the status the task ended up with, not the
/// one it passed through first.
///
/// Subtask updates run concurrently; one subtask rejecting the status (e.g.
/// a different list with other status names) does not stop the rest.
pub async fn handle_status_changed(
    client: &ClickUpClient,
    task_id: &str,
) -> Result<StatusPropagation, ClickUpError> {
    let task = client.get_task_with_subtasks(task_id).await?;

    let status = match task.status.as_ref().map(|s| s.status.clone()) {
        Some(s) if !s.is_empty() => s,
        _ => {
            warn!(task_id = %task_id, "task has no status to propagate");
            return Ok(StatusPropagation {
                status: None,
                subtask_count: task.subtasks.len(),
                updated: 0,
                failed: 0,
            });
        }
    };
    info!(task_id = %task_id, status = %status, "propagating status to subtasks");

    if task.subtasks.is_empty() {
        info!(task_id = %task_id, "no subtasks found");
        return Ok(StatusPropagation {
            status: Some(status),
            subtask_count: 0,
            updated: 0,
            failed: 0,
        });
    }

    let results = join_all(task.subtasks.iter().map(|subtask| {
        let subtask_id = subtask.id.clone();
        let status = status.as_str();
        async move {
            let result = client.update_status(&subtask_id, status).await;
            (subtask_id, result)
        }
    }))
    .await;

    let mut updated = 0;
    let mut failed = 0;
    for (subtask_id, result) in results {
        match result {
            Ok(()) => {
                info!(subtask_id = %subtask_id, status = %status, "subtask status updated");
                updated += 1;
            }
            Err(e) => {
                warn!(subtask_id = %subtask_id, error = %e, "subtask status update failed");
                failed += 1;
            }
        }
    }

    info!(
        task_id = %task_id,
        subtasks = task.subtasks.len(),
        updated,
        failed,
        "status propagation finished"
    );

    Ok(StatusPropagation {
        status: Some(status),
        subtask_count: task.subtasks.len(),
        updated,
        failed,
    })
}
