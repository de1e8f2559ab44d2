// src/engine/watch.rs

//! Per-group cancellation watches.
//!
//! A watch is registered for every managed task group before `send` is
//! called and lives until the group settles. It re-reads the group's job
//! record whenever it is signalled; once a cancellation is requested and a
//! job handle exists, it forwards `cancel` to the executor through the
//! cancel pool.
//!
//! The registry also records when a group's job handle has been persisted,
//! so a completion pushed while `send` is still running can wait for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, oneshot, watch};
use tracing::{debug, info, warn};

use crate::engine::context::DispatchContext;
use crate::errors::Result;
use crate::exec::{ExecutorAdapter, JobHandle, TaskGroupMetadata};
use crate::types::{DispatchId, NodeId, NodeStatus};

type WatchKey = (DispatchId, NodeId);

#[derive(Debug)]
struct WatchEntry {
    notify: Arc<Notify>,
    exit: oneshot::Sender<()>,
    /// Flips to true once the job handle of every member is stored.
    submitted: watch::Sender<bool>,
}

/// Active watches keyed by `(dispatch_id, task_group_id)`.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    entries: Mutex<HashMap<WatchKey, WatchEntry>>,
}

impl WatchRegistry {
    fn entries(&self) -> MutexGuard<'_, HashMap<WatchKey, WatchEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching a submitted (or about to be submitted) group.
    pub fn register(
        &self,
        ctx: &Arc<DispatchContext>,
        meta: TaskGroupMetadata,
        executor: Arc<dyn ExecutorAdapter>,
    ) {
        let notify = Arc::new(Notify::new());
        let (exit, exit_rx) = oneshot::channel();
        let key = (meta.dispatch_id.clone(), meta.task_group_id);

        let previous = self.entries().insert(
            key,
            WatchEntry {
                notify: Arc::clone(&notify),
                exit,
                submitted: watch::Sender::new(false),
            },
        );
        if let Some(previous) = previous {
            let _ = previous.exit.send(());
        }

        debug!(
            dispatch_id = %meta.dispatch_id,
            task_group_id = meta.task_group_id,
            "watch registered"
        );
        tokio::spawn(watch_group(Arc::clone(ctx), meta, executor, notify, exit_rx));
    }

    /// Wake the group's watch so it re-reads the job record.
    ///
    /// Returns false if no watch is active for the group.
    pub fn signal(&self, dispatch_id: &str, task_group_id: NodeId) -> bool {
        match self.entries().get(&(dispatch_id.to_string(), task_group_id)) {
            Some(entry) => {
                entry.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Record that the group's job handle is persisted and wake its watch.
    pub fn mark_submitted(&self, dispatch_id: &str, task_group_id: NodeId) {
        if let Some(entry) = self.entries().get(&(dispatch_id.to_string(), task_group_id)) {
            entry.submitted.send_replace(true);
            entry.notify.notify_one();
        }
    }

    /// Wait until the group's job handle is persisted.
    ///
    /// Returns false if the group has no active watch or its watch stops
    /// before submission completes (e.g. `send` failed).
    pub async fn wait_submitted(&self, dispatch_id: &str, task_group_id: NodeId) -> bool {
        let rx = self
            .entries()
            .get(&(dispatch_id.to_string(), task_group_id))
            .map(|entry| entry.submitted.subscribe());
        match rx {
            Some(mut rx) => rx.wait_for(|submitted| *submitted).await.is_ok(),
            None => false,
        }
    }

    pub fn is_active(&self, dispatch_id: &str, task_group_id: NodeId) -> bool {
        self.entries()
            .contains_key(&(dispatch_id.to_string(), task_group_id))
    }

    /// Stop the group's watch, if any.
    pub fn stop(&self, dispatch_id: &str, task_group_id: NodeId) {
        let entry = self.entries().remove(&(dispatch_id.to_string(), task_group_id));
        if let Some(entry) = entry {
            let _ = entry.exit.send(());
            debug!(dispatch_id, task_group_id, "watch stopped");
        }
    }

    pub fn stop_all(&self) {
        let entries = std::mem::take(&mut *self.entries());
        for (_, entry) in entries {
            let _ = entry.exit.send(());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

async fn watch_group(
    ctx: Arc<DispatchContext>,
    meta: TaskGroupMetadata,
    executor: Arc<dyn ExecutorAdapter>,
    notify: Arc<Notify>,
    mut exit: oneshot::Receiver<()>,
) {
    let dispatch_id = meta.dispatch_id.as_str();
    let task_group_id = meta.task_group_id;

    let raw_handle = loop {
        match ctx.job_record(dispatch_id, task_group_id).await {
            Ok(record) if record.cancel_requested => match record.job_handle {
                Some(raw) => break raw,
                None => debug!(
                    dispatch_id,
                    task_group_id, "cancellation requested; waiting for job handle"
                ),
            },
            Ok(_) => {}
            Err(err) => warn!(dispatch_id, task_group_id, error = %err, "watch could not read job record"),
        }

        tokio::select! {
            _ = notify.notified() => {}
            _ = &mut exit => return,
        }
    };

    let cancelled = match JobHandle::from_record(&raw_handle) {
        Ok(handle) => ctx.cancel_pool.cancel(Arc::clone(&executor), handle).await,
        Err(err) => Err(err),
    };

    match cancelled {
        Ok(true) => {
            info!(dispatch_id, task_group_id, "task group cancelled");
            if let Err(err) = record_cancellation(&ctx, &meta).await {
                warn!(dispatch_id, task_group_id, error = %err, "failed to record cancellation");
            }
            ctx.watches.stop(dispatch_id, task_group_id);
            ctx.notify_settled(&meta).await;
        }
        Ok(false) => {
            info!(dispatch_id, task_group_id, "executor declined cancellation");
            if let Err(err) = set_cancel_successful(&ctx, &meta, false).await {
                warn!(dispatch_id, task_group_id, error = %err, "failed to record declined cancellation");
            }
            let _ = exit.await;
        }
        Err(err) => {
            warn!(dispatch_id, task_group_id, error = %err, "cancel request failed");
            let _ = exit.await;
        }
    }
}

async fn set_cancel_successful(
    ctx: &DispatchContext,
    meta: &TaskGroupMetadata,
    successful: bool,
) -> Result<()> {
    for &node_id in &meta.task_ids {
        ctx.jobs
            .set_cancel_successful(&meta.dispatch_id, node_id, successful)
            .await?;
    }
    Ok(())
}

async fn record_cancellation(ctx: &DispatchContext, meta: &TaskGroupMetadata) -> Result<()> {
    set_cancel_successful(ctx, meta, true).await?;
    ctx.stamp_group(meta, NodeStatus::Cancelled, None).await
}
