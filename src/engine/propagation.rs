// src/engine/propagation.rs

//! Result propagation for task groups that reached a terminal state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::engine::context::DispatchContext;
use crate::errors::{DispatchError, Result};
use crate::exec::{JobHandle, TaskGroupMetadata, TaskResult};
use crate::store::generate_node_result;
use crate::types::{AssetKind, NodeId, NodeStatus};

/// Fetch and persist the results of a ready task group, then settle it.
///
/// Never fails: any error while fetching turns every member without a
/// persisted terminal status into FAILED (or CANCELLED when the job record
/// shows an honoured cancellation).
pub async fn fetch_task_group_results(ctx: Arc<DispatchContext>, meta: TaskGroupMetadata) {
    if let Err(err) = fetch_and_store(&ctx, &meta).await {
        error!(
            dispatch_id = %meta.dispatch_id,
            task_group_id = meta.task_group_id,
            error = %err,
            "failed to fetch task group results"
        );

        let cancelled = ctx
            .job_record(&meta.dispatch_id, meta.task_group_id)
            .await
            .map(|record| record.cancel_successful)
            .unwrap_or(false);
        let stamped = if cancelled {
            ctx.stamp_group(&meta, NodeStatus::Cancelled, None).await
        } else {
            ctx.stamp_group(&meta, NodeStatus::Failed, Some(ctx.error_detail(&err)))
                .await
        };
        if let Err(err) = stamped {
            error!(
                dispatch_id = %meta.dispatch_id,
                task_group_id = meta.task_group_id,
                error = %err,
                "failed to record task group failure"
            );
        }
    }

    ctx.watches.stop(&meta.dispatch_id, meta.task_group_id);
    ctx.notify_settled(&meta).await;
}

async fn fetch_and_store(ctx: &DispatchContext, meta: &TaskGroupMetadata) -> Result<()> {
    let dispatch_id = meta.dispatch_id.as_str();
    let task_group_id = meta.task_group_id;

    // Rebuilt from the persisted selection; executors are not kept in memory
    // between submission and completion.
    let selection = ctx.selection_of(dispatch_id, task_group_id).await?;
    let executor = ctx.executor_for(task_group_id, &selection)?;

    let mut record = ctx.job_record(dispatch_id, task_group_id).await?;
    if record.job_handle.is_none() && ctx.watches.wait_submitted(dispatch_id, task_group_id).await {
        debug!(dispatch_id, task_group_id, "ready before submission finished; handle now stored");
        record = ctx.job_record(dispatch_id, task_group_id).await?;
    }
    let raw_handle = record.job_handle.as_deref().ok_or_else(|| {
        DispatchError::TaskFailed(format!(
            "no job handle recorded for task group {task_group_id}"
        ))
    })?;
    let handle = JobHandle::from_record(raw_handle)?;

    let reported = executor.receive(meta, &handle, record.status).await?;
    debug!(
        dispatch_id,
        task_group_id,
        results = reported.len(),
        "received task group results"
    );

    let mut by_node: HashMap<NodeId, TaskResult> = HashMap::new();
    for result in reported {
        if meta.task_ids.contains(&result.node_id) {
            by_node.insert(result.node_id, result);
        } else {
            warn!(
                dispatch_id,
                task_group_id,
                node_id = result.node_id,
                "executor reported a node outside the group; ignoring"
            );
        }
    }

    let outputs: BTreeMap<NodeId, String> = by_node
        .values()
        .filter(|r| r.status == NodeStatus::Completed)
        .filter_map(|r| r.output_uri.clone().map(|uri| (r.node_id, uri)))
        .collect();
    ctx.assets
        .download_asset_for_nodes(dispatch_id, AssetKind::Output, &outputs)
        .await?;

    let now = Utc::now();
    for &node_id in &meta.task_ids {
        let update = match by_node.remove(&node_id) {
            Some(result) => {
                let (status, error) = if !result.status.is_terminal() {
                    let error = result.error.unwrap_or_else(|| {
                        format!("executor reported non-terminal status {}", result.status)
                    });
                    (NodeStatus::Failed, Some(error))
                } else if result.status != NodeStatus::Completed && record.cancel_successful {
                    (NodeStatus::Cancelled, result.error)
                } else {
                    (result.status, result.error)
                };
                let output_uri = outputs
                    .contains_key(&node_id)
                    .then(|| ctx.assets.local_uri(dispatch_id, node_id, AssetKind::Output));

                let mut update = generate_node_result(node_id, status)
                    .with_end_time(now)
                    .with_output_uri(output_uri)
                    .with_stdout_uri(result.stdout_uri)
                    .with_stderr_uri(result.stderr_uri);
                if let Some(error) = error {
                    update = update.with_error(error);
                }
                update
            }
            None => {
                warn!(dispatch_id, node_id, "executor returned no result for node");
                generate_node_result(node_id, NodeStatus::Failed)
                    .with_end_time(now)
                    .with_error(format!("executor returned no result for node {node_id}"))
            }
        };

        let status = update.status;
        if ctx.write_result(dispatch_id, update).await? {
            info!(dispatch_id, task_group_id, node_id, %status, "node finished");
        } else {
            debug!(dispatch_id, node_id, "node already terminal; result not overwritten");
        }
    }

    Ok(())
}

/// Stamp every member of the group FAILED with `detail`, then settle it.
///
/// The group is settled even if persisting fails, so the dispatch is not
/// left waiting on it.
pub async fn fail_task_group(
    ctx: &DispatchContext,
    meta: &TaskGroupMetadata,
    detail: &str,
) -> Result<()> {
    warn!(
        dispatch_id = %meta.dispatch_id,
        task_group_id = meta.task_group_id,
        detail,
        "task group failed"
    );
    let stamped = ctx
        .stamp_group(meta, NodeStatus::Failed, Some(detail.to_string()))
        .await;

    ctx.watches.stop(&meta.dispatch_id, meta.task_group_id);
    ctx.notify_settled(meta).await;
    stamped
}
