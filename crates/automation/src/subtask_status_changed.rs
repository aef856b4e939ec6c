//! Parts-cost aggregation: sum a currency field across subtasks onto the
//! parent, triggered whenever any subtask's status changes.
//!
//! This is the job that benefits most from coalescing — closing out a batch
//! of subtasks fires one webhook per subtask, and each run here recomputes
//! the full sum from current state, so only the last run in a burst matters.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use relay_clickup::fields::{currency_cents, format_cents};
use relay_clickup::{ClickUpClient, ClickUpError};
use relay_core::config::AutomationConfig;

use crate::field_sync::{verify_field_updates, FieldUpdate};

/// Result summary of one aggregation run.
#[derive(Debug)]
pub struct CostAggregation {
    pub subtask_count: usize,
    pub total: String,
    pub verified: bool,
}

/// Recompute the parent's total parts cost from its subtasks.
///
/// Fetches each subtask's detail with bounded concurrency, sums the
/// configured currency field in integer cents, writes the total to the
/// parent, and verifies the write (one retry after a short pause). A parent
/// without subtasks gets an explicit `0.00`.
pub async fn handle_subtask_status_changed(
    client: &ClickUpClient,
    cfg: &AutomationConfig,
    parent_task_id: &str,
) -> Result<CostAggregation, ClickUpError> {
    info!(parent_task_id = %parent_task_id, "aggregating subtask parts costs");

    let parent = client.get_task_with_subtasks(parent_task_id).await?;
    let subtask_ids: Vec<String> = parent.subtasks.iter().map(|t| t.id.clone()).collect();
    info!(
        parent_task_id = %parent_task_id,
        subtasks = subtask_ids.len(),
        "subtasks found"
    );

    let total_cents = sum_parts_costs(client, cfg, &subtask_ids).await;
    let total = format_cents(total_cents);
    info!(
        parent_task_id = %parent_task_id,
        total = %total,
        "computed total parts cost"
    );

    let expected = FieldUpdate {
        id: cfg.total_parts_cost_field_id.clone(),
        name: "Total Parts Cost".to_string(),
        field_type: "currency".to_string(),
        value: json!(total),
    };

    client
        .set_custom_field(parent_task_id, &expected.id, &expected.value)
        .await?;

    let (mut verified, _) =
        verify_field_updates(client, parent_task_id, std::slice::from_ref(&expected)).await;

    if !verified {
        warn!(parent_task_id = %parent_task_id, "total verification failed — retrying once");
        tokio::time::sleep(Duration::from_millis(800)).await;
        if let Err(e) = client
            .set_custom_field(parent_task_id, &expected.id, &expected.value)
            .await
        {
            warn!(parent_task_id = %parent_task_id, error = %e, "total rewrite failed");
        }
        let (second, _) =
            verify_field_updates(client, parent_task_id, std::slice::from_ref(&expected)).await;
        verified = second;
    }

    if verified {
        info!(
            parent_task_id = %parent_task_id,
            total = %total,
            "total parts cost updated and verified"
        );
    } else {
        warn!(
            parent_task_id = %parent_task_id,
            total = %total,
            "total parts cost could not be verified"
        );
    }

    Ok(CostAggregation {
        subtask_count: subtask_ids.len(),
        total,
        verified,
    })
}

/// Fetch each subtask and sum its parts-cost field, in cents.
///
/// Fetch concurrency is capped to avoid tripping the API rate limit; a
/// subtask that cannot be fetched contributes zero rather than failing the
/// aggregation.
async fn sum_parts_costs(
    client: &ClickUpClient,
    cfg: &AutomationConfig,
    subtask_ids: &[String],
) -> i64 {
    let gate = Arc::new(Semaphore::new(cfg.fetch_concurrency.max(1)));

    let costs = join_all(subtask_ids.iter().map(|subtask_id| {
        let gate = gate.clone();
        async move {
            let _permit = gate.acquire_owned().await.expect("fetch gate closed");
            match client.get_task(subtask_id).await {
                Ok(task) => task
                    .custom_field(&cfg.parts_cost_field_id)
                    .and_then(|f| f.value.as_ref())
                    .map(currency_cents)
                    .unwrap_or(0),
                Err(e) => {
                    warn!(
                        subtask_id = %subtask_id,
                        error = %e,
                        "could not fetch subtask — cost counted as zero"
                    );
                    0
                }
            }
        }
    }))
    .await;

    costs.into_iter().sum()
}
