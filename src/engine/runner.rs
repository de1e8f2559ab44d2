// src/engine/runner.rs

//! Task group runner.
//!
//! A scheduled group goes `SUBMITTING -> RUNNING -> {READY, FAILED}`:
//!
//! 1. If cancellation was requested for the representative before
//!    submission, every member is CANCELLED and the group settles at once.
//! 2. A non-managed executor runs a single-node group through the direct
//!    path; a larger group is a packing error and fails as a whole.
//! 3. Otherwise the function, dependency and hook payloads of every task
//!    plus the outputs of known inputs are uploaded, members go RUNNING,
//!    a cancellation watch is registered and the group is sent.
//! 4. After `send` the group is polled; completion is published on the job
//!    event bus.
//!
//! Every error on this path is mapped to FAILED for all members in one
//! place ([`run_task_group`]); nothing propagates to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::dag::task_group::ScheduledGroup;
use crate::engine::context::DispatchContext;
use crate::errors::{DispatchError, Result};
use crate::exec::adapter::{function_key, input_key};
use crate::exec::{ExecutorAdapter, JobHandle, PollStatus, ResourceMap, TaskGroupMetadata, TaskSpec};
use crate::store::generate_node_result;
use crate::types::{AssetKind, DispatchId, NodeId, NodeStatus};

/// Drive one scheduled task group until it is submitted (or settled).
pub async fn run_task_group(ctx: Arc<DispatchContext>, dispatch_id: DispatchId, group: ScheduledGroup) {
    let meta = group.metadata(&dispatch_id);

    if let Err(err) = submit(&ctx, &meta, &group).await {
        error!(
            dispatch_id = %meta.dispatch_id,
            task_group_id = meta.task_group_id,
            error = %err,
            "task group submission failed"
        );
        let detail = ctx.error_detail(&err);
        if let Err(err) = ctx.stamp_group(&meta, NodeStatus::Failed, Some(detail)).await {
            error!(
                dispatch_id = %meta.dispatch_id,
                task_group_id = meta.task_group_id,
                error = %err,
                "failed to record task group failure"
            );
        }
        ctx.watches.stop(&meta.dispatch_id, meta.task_group_id);
        ctx.notify_settled(&meta).await;
    }
}

async fn submit(ctx: &Arc<DispatchContext>, meta: &TaskGroupMetadata, group: &ScheduledGroup) -> Result<()> {
    let dispatch_id = meta.dispatch_id.as_str();
    let task_group_id = meta.task_group_id;

    let record = ctx.job_record(dispatch_id, task_group_id).await?;
    if record.cancel_requested {
        info!(
            dispatch_id,
            task_group_id, "cancellation requested before submission; cancelling group"
        );
        ctx.stamp_group(meta, NodeStatus::Cancelled, None).await?;
        ctx.notify_settled(meta).await;
        return Ok(());
    }

    let executor = ctx.executor_for(task_group_id, &group.executor)?;

    if !executor.supports_managed_execution() {
        let [task] = group.tasks.as_slice() else {
            return Err(DispatchError::TaskPackingUnsupported {
                executor: executor.short_name().to_string(),
                tasks: group.len(),
            });
        };
        debug!(
            dispatch_id,
            node_id = task.node_id(),
            executor = executor.short_name(),
            "executor has no managed execution; using direct path"
        );
        tokio::spawn(run_direct(
            Arc::clone(ctx),
            meta.clone(),
            task.clone(),
            executor,
        ));
        return Ok(());
    }

    let resources = upload_resources(ctx, meta, group, executor.as_ref()).await?;

    let now = Utc::now();
    for &node_id in &meta.task_ids {
        ctx.write_result(
            dispatch_id,
            generate_node_result(node_id, NodeStatus::Running).with_start_time(now),
        )
        .await?;
    }

    // Registered before `send` so a cancel racing the submission is seen,
    // and so a completion pushed from inside `send` can wait for the handle.
    ctx.watches.register(ctx, meta.clone(), Arc::clone(&executor));

    let handle = executor.send(&group.tasks, &resources, meta).await?;
    let raw_handle = handle.to_record()?;
    for &node_id in &meta.task_ids {
        ctx.jobs
            .set_job_handle(dispatch_id, node_id, raw_handle.clone())
            .await?;
    }
    ctx.watches.mark_submitted(dispatch_id, task_group_id);
    info!(
        dispatch_id,
        task_group_id,
        tasks = group.len(),
        executor = executor.short_name(),
        "task group submitted"
    );

    poll_task_group(ctx, meta, executor.as_ref(), &handle).await;
    Ok(())
}

/// Allocate upload URIs for every asset of the group and push the assets.
async fn upload_resources(
    ctx: &DispatchContext,
    meta: &TaskGroupMetadata,
    group: &ScheduledGroup,
    executor: &dyn ExecutorAdapter,
) -> Result<ResourceMap> {
    let dispatch_id = meta.dispatch_id.as_str();
    let mut resources = ResourceMap::default();

    let mut deps: BTreeMap<NodeId, String> = BTreeMap::new();
    let mut call_before: BTreeMap<NodeId, String> = BTreeMap::new();
    let mut call_after: BTreeMap<NodeId, String> = BTreeMap::new();

    for task in &group.tasks {
        let node_id = task.node_id();
        let function_uri = executor.get_upload_uri(meta, &function_key(node_id))?;
        resources.functions.insert(node_id, function_uri);

        for (key, uploads) in [
            (&task.deps_id, &mut deps),
            (&task.call_before_id, &mut call_before),
            (&task.call_after_id, &mut call_after),
        ] {
            let uri = executor.get_upload_uri(meta, key)?;
            uploads.insert(node_id, uri.clone());
            resources.deps.insert(key.clone(), uri);
        }
    }

    for &node_id in &group.known {
        let uri = executor.get_upload_uri(meta, &input_key(node_id))?;
        resources.inputs.insert(node_id, uri);
    }

    let assets = &ctx.assets;
    assets
        .upload_asset_for_nodes(dispatch_id, AssetKind::Function, &resources.functions)
        .await?;
    assets
        .upload_asset_for_nodes(dispatch_id, AssetKind::Deps, &deps)
        .await?;
    assets
        .upload_asset_for_nodes(dispatch_id, AssetKind::CallBefore, &call_before)
        .await?;
    assets
        .upload_asset_for_nodes(dispatch_id, AssetKind::CallAfter, &call_after)
        .await?;
    assets
        .upload_asset_for_nodes(dispatch_id, AssetKind::Output, &resources.inputs)
        .await?;

    debug!(
        dispatch_id,
        task_group_id = meta.task_group_id,
        functions = resources.functions.len(),
        inputs = resources.inputs.len(),
        "task group assets uploaded"
    );
    Ok(resources)
}

/// Check a submitted group for completion.
///
/// Ready and failed groups are published on the job event bus. A group that
/// is still running is re-polled only when a re-poll interval is configured;
/// otherwise completion must be pushed by the executor.
async fn poll_task_group(
    ctx: &DispatchContext,
    meta: &TaskGroupMetadata,
    executor: &dyn ExecutorAdapter,
    handle: &JobHandle,
) {
    let dispatch_id = meta.dispatch_id.as_str();
    let task_group_id = meta.task_group_id;

    loop {
        match executor.poll(meta, handle).await {
            Ok(PollStatus::Ready) => {
                debug!(dispatch_id, task_group_id, "poll: task group ready");
                if let Err(err) = ctx.events.mark_ready(meta.clone()).await {
                    error!(dispatch_id, task_group_id, error = %err, "failed to publish ready event");
                }
                return;
            }
            Ok(PollStatus::Unsupported) => {
                debug!(
                    dispatch_id,
                    task_group_id, "polling unsupported; waiting for push notification"
                );
                return;
            }
            Ok(PollStatus::Running) => match ctx.repoll_interval {
                Some(interval) => {
                    tokio::time::sleep(interval).await;
                    if !ctx.watches.is_active(dispatch_id, task_group_id) {
                        debug!(dispatch_id, task_group_id, "group settled; stop polling");
                        return;
                    }
                }
                None => {
                    debug!(
                        dispatch_id,
                        task_group_id, "poll: still running; waiting for push notification"
                    );
                    return;
                }
            },
            Err(err) => {
                warn!(dispatch_id, task_group_id, error = %err, "poll failed");
                let detail = ctx.error_detail(&err);
                if let Err(err) = ctx.events.mark_failed(meta.clone(), detail).await {
                    error!(dispatch_id, task_group_id, error = %err, "failed to publish failure event");
                }
                return;
            }
        }
    }
}

/// Direct path: run a single node on a non-managed executor.
async fn run_direct(
    ctx: Arc<DispatchContext>,
    meta: TaskGroupMetadata,
    task: TaskSpec,
    executor: Arc<dyn ExecutorAdapter>,
) {
    let dispatch_id = meta.dispatch_id.as_str();
    let node_id = task.node_id();

    let update = match execute_direct(&ctx, dispatch_id, &task, executor.as_ref()).await {
        Ok(output_uri) => {
            info!(dispatch_id, node_id, "node completed");
            generate_node_result(node_id, NodeStatus::Completed)
                .with_end_time(Utc::now())
                .with_output_uri(Some(output_uri))
        }
        Err(err) => {
            warn!(dispatch_id, node_id, error = %err, "node failed");
            generate_node_result(node_id, NodeStatus::Failed)
                .with_end_time(Utc::now())
                .with_error(ctx.error_detail(&err))
        }
    };

    if let Err(err) = ctx.write_result(dispatch_id, update).await {
        error!(dispatch_id, node_id, error = %err, "failed to record node result");
        if let Err(err) = ctx
            .stamp_group(&meta, NodeStatus::Failed, Some(ctx.error_detail(&err)))
            .await
        {
            error!(dispatch_id, node_id, error = %err, "failed to record node failure");
        }
    }
    ctx.notify_settled(&meta).await;
}

async fn execute_direct(
    ctx: &DispatchContext,
    dispatch_id: &str,
    task: &TaskSpec,
    executor: &dyn ExecutorAdapter,
) -> Result<String> {
    let node_id = task.node_id();
    ctx.write_result(
        dispatch_id,
        generate_node_result(node_id, NodeStatus::Running).with_start_time(Utc::now()),
    )
    .await?;

    let function = ctx
        .assets
        .load(dispatch_id, node_id, AssetKind::Function)
        .await?;
    let function = function.as_str().ok_or_else(|| {
        DispatchError::TaskFailed(format!("node {node_id} has no function reference"))
    })?;

    let mut args: Vec<Value> = Vec::with_capacity(task.args_ids.len());
    for &id in &task.args_ids {
        args.push(ctx.assets.load(dispatch_id, id, AssetKind::Output).await?);
    }
    let mut kwargs: BTreeMap<String, Value> = BTreeMap::new();
    for (key, &id) in &task.kwargs_ids {
        kwargs.insert(
            key.clone(),
            ctx.assets.load(dispatch_id, id, AssetKind::Output).await?,
        );
    }

    let output = executor.execute(function, args, kwargs).await?;
    ctx.assets
        .stage(dispatch_id, node_id, AssetKind::Output, output)
        .await
}
