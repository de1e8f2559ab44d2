// src/exec/batch.rs

//! Managed executor backed by an in-process batch queue.
//!
//! `send` enqueues the whole task group as one batch job and returns at
//! once. The job reads its function and input payloads from the URIs in
//! the resource map, writes outputs under `batch://` URIs and, when done,
//! pushes a `Ready` event for the group.
//!
//! Executor config (all optional):
//!
//! ```toml
//! executor = "batch"
//! executor_config = { delay_ms = 50, supports_poll = false }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::errors::{DispatchError, Result};
use crate::exec::adapter::{
    ExecutorAdapter, JobHandle, PollStatus, ResourceMap, TaskGroupMetadata, TaskResult, TaskSpec,
};
use crate::exec::functions::FunctionRegistry;
use crate::exec::registry::ExecutorEnv;
use crate::types::{BoxFuture, NodeId, NodeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Running,
    Done,
    Cancelled,
}

#[derive(Debug)]
struct BatchJob {
    state: JobState,
    task_ids: Vec<NodeId>,
    results: Vec<TaskResult>,
    abort: Option<AbortHandle>,
}

/// Job table shared by every `BatchExecutor` built from one registry.
///
/// Finished jobs stay in the table for the life of the queue, so a repeated
/// `Ready` for a group can still `receive` its results.
#[derive(Debug, Clone, Default)]
pub struct BatchQueue {
    jobs: Arc<Mutex<HashMap<String, BatchJob>>>,
}

impl BatchQueue {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, BatchJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BatchConfig {
    /// Simulated queueing delay before the job starts.
    #[serde(default)]
    delay_ms: u64,

    /// When false, `poll` reports `Unsupported` and completion is push-only.
    #[serde(default = "default_supports_poll")]
    supports_poll: bool,
}

fn default_supports_poll() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            supports_poll: default_supports_poll(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    queue: BatchQueue,
    functions: Arc<FunctionRegistry>,
    env: ExecutorEnv,
    config: BatchConfig,
}

impl BatchExecutor {
    pub const NAME: &'static str = "batch";

    pub fn from_config(
        queue: BatchQueue,
        functions: Arc<FunctionRegistry>,
        env: ExecutorEnv,
        config: &Value,
    ) -> Result<Self> {
        let config = if config.is_null() {
            BatchConfig::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        Ok(Self {
            queue,
            functions,
            env,
            config,
        })
    }

    fn job_id(meta: &TaskGroupMetadata) -> String {
        format!("{}:{}", meta.dispatch_id, meta.task_group_id)
    }

    fn job_id_of(handle: &JobHandle) -> Result<String> {
        handle
            .0
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DispatchError::TaskFailed(format!("malformed batch job handle {}", handle.0)))
    }
}

impl ExecutorAdapter for BatchExecutor {
    fn short_name(&self) -> &str {
        Self::NAME
    }

    fn supports_managed_execution(&self) -> bool {
        true
    }

    fn get_upload_uri(&self, meta: &TaskGroupMetadata, asset_key: &str) -> Result<String> {
        Ok(format!(
            "batch://{}/{}/assets/{asset_key}",
            meta.dispatch_id, meta.task_group_id
        ))
    }

    fn send<'a>(
        &'a self,
        tasks: &'a [TaskSpec],
        resources: &'a ResourceMap,
        meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>> {
        Box::pin(async move {
            let job_id = Self::job_id(meta);
            let handle = JobHandle(json!({ "job_id": job_id }));

            let mut jobs = self.queue.lock();
            if let Some(job) = jobs.get(&job_id) {
                if job.state != JobState::Cancelled {
                    debug!(%job_id, "group already submitted; returning existing handle");
                    return Ok(handle);
                }
            }

            jobs.insert(
                job_id.clone(),
                BatchJob {
                    state: JobState::Running,
                    task_ids: tasks.iter().map(TaskSpec::node_id).collect(),
                    results: Vec::new(),
                    abort: None,
                },
            );

            let run = BatchRun {
                job_id: job_id.clone(),
                tasks: tasks.to_vec(),
                resources: resources.clone(),
                meta: meta.clone(),
                executor: self.clone(),
            };
            let task = tokio::spawn(run.execute());
            if let Some(job) = jobs.get_mut(&job_id) {
                job.abort = Some(task.abort_handle());
            }
            drop(jobs);

            info!(%job_id, tasks = tasks.len(), "batch job submitted");
            Ok(handle)
        })
    }

    fn poll<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        handle: &'a JobHandle,
    ) -> BoxFuture<'a, Result<PollStatus>> {
        Box::pin(async move {
            if !self.config.supports_poll {
                return Ok(PollStatus::Unsupported);
            }
            let job_id = Self::job_id_of(handle)?;
            let jobs = self.queue.lock();
            let job = jobs
                .get(&job_id)
                .ok_or_else(|| DispatchError::TaskFailed(format!("unknown batch job '{job_id}'")))?;
            Ok(match job.state {
                JobState::Running => PollStatus::Running,
                JobState::Done | JobState::Cancelled => PollStatus::Ready,
            })
        })
    }

    fn receive<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        handle: &'a JobHandle,
        _status: NodeStatus,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>> {
        Box::pin(async move {
            let job_id = Self::job_id_of(handle)?;
            let jobs = self.queue.lock();
            let job = jobs
                .get(&job_id)
                .ok_or_else(|| DispatchError::TaskFailed(format!("unknown batch job '{job_id}'")))?;
            match job.state {
                JobState::Running => Err(DispatchError::TaskFailed(format!(
                    "batch job '{job_id}' is still running"
                ))),
                JobState::Done => Ok(job.results.clone()),
                JobState::Cancelled => Ok(job.task_ids.iter().map(|&id| TaskResult::cancelled(id)).collect()),
            }
        })
    }

    fn cancel(&self, handle: &JobHandle) -> Result<bool> {
        let job_id = Self::job_id_of(handle)?;
        let mut jobs = self.queue.lock();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.state != JobState::Running {
            return Ok(false);
        }

        if let Some(abort) = job.abort.take() {
            abort.abort();
        }
        job.state = JobState::Cancelled;
        info!(%job_id, "batch job cancelled");
        Ok(true)
    }
}

/// One submitted batch job, run as its own Tokio task.
struct BatchRun {
    job_id: String,
    tasks: Vec<TaskSpec>,
    resources: ResourceMap,
    meta: TaskGroupMetadata,
    executor: BatchExecutor,
}

impl BatchRun {
    async fn execute(self) {
        if self.executor.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.executor.config.delay_ms)).await;
        }

        let mut results = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let result = match self.run_task(task).await {
                Ok(output_uri) => TaskResult::completed(task.node_id(), output_uri),
                Err(err) => {
                    let mut failed = TaskResult::failed(task.node_id(), err.to_string());
                    let stderr_uri = self.uri(task, "stderr");
                    if self
                        .executor
                        .env
                        .assets
                        .write_uri(&stderr_uri, Value::String(err.to_string()))
                        .await
                        .is_ok()
                    {
                        failed.stderr_uri = Some(stderr_uri);
                    }
                    failed
                }
            };
            results.push(result);
        }

        {
            let mut jobs = self.executor.queue.lock();
            match jobs.get_mut(&self.job_id) {
                Some(job) if job.state == JobState::Running => {
                    job.state = JobState::Done;
                    job.results = results;
                    job.abort = None;
                }
                _ => {
                    debug!(job_id = %self.job_id, "job cancelled before completion");
                    return;
                }
            }
        }

        debug!(job_id = %self.job_id, "batch job done; notifying dispatcher");
        if let Err(err) = self.executor.env.events.mark_ready(self.meta.clone()).await {
            warn!(job_id = %self.job_id, error = %err, "failed to push ready event");
        }
    }

    fn uri(&self, task: &TaskSpec, kind: &str) -> String {
        format!("batch://{}/node_{}/{kind}", self.job_id, task.node_id())
    }

    async fn run_task(&self, task: &TaskSpec) -> Result<String> {
        let assets = &self.executor.env.assets;

        let function_uri = self.resources.functions.get(&task.function_id).ok_or_else(|| {
            DispatchError::AssetNotFound(format!("function payload of node {}", task.function_id))
        })?;
        let function = assets.read_uri(function_uri).await?;
        let function = function.as_str().ok_or_else(|| {
            DispatchError::TaskFailed(format!("function payload {function_uri} is not a name"))
        })?;

        let mut args = Vec::with_capacity(task.args_ids.len());
        for id in &task.args_ids {
            args.push(self.read_input(*id).await?);
        }
        let mut kwargs = BTreeMap::new();
        for (key, id) in &task.kwargs_ids {
            kwargs.insert(key.clone(), self.read_input(*id).await?);
        }

        let f = self.executor.functions.get(function)?;
        let output = f(args, kwargs).map_err(DispatchError::TaskFailed)?;

        let output_uri = self.uri(task, "output");
        assets.write_uri(&output_uri, output).await?;
        Ok(output_uri)
    }

    async fn read_input(&self, node_id: NodeId) -> Result<Value> {
        let uri = self
            .resources
            .inputs
            .get(&node_id)
            .ok_or_else(|| DispatchError::AssetNotFound(format!("input node_{node_id}")))?;
        self.executor.env.assets.read_uri(uri).await
    }
}
