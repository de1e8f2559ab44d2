// src/engine/context.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::DispatcherSection;
use crate::dag::node::ExecutorSelection;
use crate::engine::RuntimeEvent;
use crate::engine::bus::JobEvents;
use crate::engine::watch::WatchRegistry;
use crate::errors::{DispatchError, Result, error_detail};
use crate::exec::{CancelPool, ExecutorAdapter, ExecutorEnv, ExecutorRegistry, TaskGroupMetadata};
use crate::store::{
    AssetTransfer, JobRecord, JobStore, NodeAttribute, NodeResult, NodeResultStore,
    generate_node_result,
};
use crate::types::{DispatchId, NodeId, NodeStatus};

/// Everything the coordinator tasks of a dispatcher share.
///
/// Runners, the bus listener, propagation and watches each hold an `Arc` of
/// this; none of them keeps executor instances across an async gap.
#[derive(Debug)]
pub struct DispatchContext {
    pub debug_mode: bool,
    pub repoll_interval: Option<Duration>,
    pub channel_capacity: usize,
    pub results: Arc<dyn NodeResultStore>,
    pub jobs: Arc<dyn JobStore>,
    pub assets: Arc<dyn AssetTransfer>,
    pub registry: Arc<ExecutorRegistry>,
    pub events: JobEvents,
    pub cancel_pool: CancelPool,
    pub watches: WatchRegistry,
    runtimes: Mutex<HashMap<DispatchId, mpsc::Sender<RuntimeEvent>>>,
}

impl DispatchContext {
    pub(crate) fn new(
        settings: &DispatcherSection,
        results: Arc<dyn NodeResultStore>,
        jobs: Arc<dyn JobStore>,
        assets: Arc<dyn AssetTransfer>,
        registry: Arc<ExecutorRegistry>,
        events: JobEvents,
        cancel_pool: CancelPool,
    ) -> Self {
        Self {
            debug_mode: settings.debug_mode,
            repoll_interval: settings.repoll_interval(),
            channel_capacity: settings.event_bus_capacity,
            results,
            jobs,
            assets,
            registry,
            events,
            cancel_pool,
            watches: WatchRegistry::default(),
            runtimes: Mutex::new(HashMap::new()),
        }
    }

    fn runtimes(&self) -> MutexGuard<'_, HashMap<DispatchId, mpsc::Sender<RuntimeEvent>>> {
        self.runtimes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the notification channel of a dispatch. Group settlements for
    /// `dispatch_id` are delivered to the returned receiver.
    pub fn attach_runtime(&self, dispatch_id: &str) -> mpsc::Receiver<RuntimeEvent> {
        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        if self.runtimes().insert(dispatch_id.to_string(), tx).is_some() {
            warn!(dispatch_id, "replacing an existing runtime for this dispatch");
        }
        rx
    }

    pub fn detach_runtime(&self, dispatch_id: &str) {
        self.runtimes().remove(dispatch_id);
    }

    async fn send_to_runtime(&self, dispatch_id: &str, event: RuntimeEvent) {
        let tx = self.runtimes().get(dispatch_id).cloned();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    debug!(dispatch_id, "runtime already gone; dropping event");
                }
            }
            None => debug!(dispatch_id, ?event, "no runtime attached; dropping event"),
        }
    }

    /// Tell the dispatch that every member of the group is terminal.
    pub async fn notify_settled(&self, meta: &TaskGroupMetadata) {
        self.send_to_runtime(
            &meta.dispatch_id,
            RuntimeEvent::GroupSettled {
                task_group_id: meta.task_group_id,
                node_ids: meta.task_ids.clone(),
            },
        )
        .await;
    }

    pub async fn request_shutdown(&self, dispatch_id: &str) {
        self.send_to_runtime(dispatch_id, RuntimeEvent::ShutdownRequested)
            .await;
    }

    pub fn error_detail(&self, err: &DispatchError) -> String {
        error_detail(err, self.debug_mode)
    }

    pub fn executor_env(&self) -> ExecutorEnv {
        ExecutorEnv {
            assets: Arc::clone(&self.assets),
            events: self.events.clone(),
        }
    }

    pub fn executor_for(
        &self,
        task_group_id: NodeId,
        selection: &ExecutorSelection,
    ) -> Result<Arc<dyn ExecutorAdapter>> {
        self.registry
            .get_executor(task_group_id, selection, &self.executor_env())
    }

    /// Executor selection persisted for a task group's representative.
    pub async fn selection_of(&self, dispatch_id: &str, task_group_id: NodeId) -> Result<ExecutorSelection> {
        let name = self
            .results
            .get_attribute(dispatch_id, task_group_id, NodeAttribute::Executor)
            .await?;
        let name = name.as_str().ok_or_else(|| {
            DispatchError::ConfigError(format!(
                "node {task_group_id} has no executor name recorded"
            ))
        })?;
        let config = self
            .results
            .get_attribute(dispatch_id, task_group_id, NodeAttribute::ExecutorData)
            .await?;
        Ok(ExecutorSelection::new(name, config))
    }

    /// Job record of a task group, read through its representative.
    pub async fn job_record(&self, dispatch_id: &str, task_group_id: NodeId) -> Result<JobRecord> {
        let mut records = self
            .jobs
            .get_jobs_metadata(dispatch_id, &[task_group_id])
            .await?;
        records.pop().ok_or_else(|| DispatchError::JobNotFound {
            dispatch_id: dispatch_id.to_string(),
            node_id: task_group_id,
        })
    }

    /// Persist a node result; mirrors the status into the job record when
    /// the store accepted the transition.
    pub async fn write_result(&self, dispatch_id: &str, result: NodeResult) -> Result<bool> {
        let node_id = result.node_id;
        let status = result.status;
        let applied = self.results.update_node_result(dispatch_id, result).await?;
        if applied {
            self.jobs.put_job_status(dispatch_id, node_id, status).await?;
        }
        Ok(applied)
    }

    /// Stamp one terminal status (and optional detail) on every member.
    pub async fn stamp_group(
        &self,
        meta: &TaskGroupMetadata,
        status: NodeStatus,
        detail: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        for &node_id in &meta.task_ids {
            let mut result = generate_node_result(node_id, status).with_end_time(now);
            if let Some(detail) = &detail {
                result = result.with_error(detail.clone());
            }
            self.write_result(&meta.dispatch_id, result).await?;
        }
        Ok(())
    }
}
