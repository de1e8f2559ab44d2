// src/exec/adapter.rs

//! The executor contract.
//!
//! An executor runs node functions in one of two models:
//!
//! - **direct**: [`ExecutorAdapter::execute`] runs one node and returns its
//!   output. No task packing.
//! - **managed**: the executor accepts a whole task group through
//!   [`ExecutorAdapter::send`] and reports completion through `poll`/`receive`
//!   (or by pushing a `Ready` event onto the job event bus).
//!
//! Executors advertise the managed model with
//! [`ExecutorAdapter::supports_managed_execution`].

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DispatchError, Result};
use crate::types::{BoxFuture, DispatchId, NodeId, NodeStatus};

/// Identifies one task group across submission, polling and result fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskGroupMetadata {
    pub dispatch_id: DispatchId,
    /// Id of the group's representative (first) node.
    pub task_group_id: NodeId,
    pub task_ids: Vec<NodeId>,
}

/// One task of a group, described by asset keys and input node ids only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub function_id: NodeId,
    pub args_ids: Vec<NodeId>,
    pub kwargs_ids: BTreeMap<String, NodeId>,
    pub deps_id: String,
    pub call_before_id: String,
    pub call_after_id: String,
}

impl TaskSpec {
    pub fn new(
        node_id: NodeId,
        args_ids: Vec<NodeId>,
        kwargs_ids: BTreeMap<String, NodeId>,
    ) -> Self {
        Self {
            function_id: node_id,
            args_ids,
            kwargs_ids,
            deps_id: deps_key(node_id),
            call_before_id: call_before_key(node_id),
            call_after_id: call_after_key(node_id),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.function_id
    }
}

pub fn function_key(node_id: NodeId) -> String {
    format!("function-{node_id}")
}

pub fn deps_key(node_id: NodeId) -> String {
    format!("deps-{node_id}")
}

pub fn call_before_key(node_id: NodeId) -> String {
    format!("call_before-{node_id}")
}

pub fn call_after_key(node_id: NodeId) -> String {
    format!("call_after-{node_id}")
}

/// Asset key of a known input's output.
pub fn input_key(node_id: NodeId) -> String {
    format!("node_{node_id}")
}

/// Where each asset of a group was uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMap {
    /// Function payload URI per task node id.
    pub functions: BTreeMap<NodeId, String>,
    /// Dependency and hook payload URIs keyed by `deps-<id>`,
    /// `call_before-<id>` and `call_after-<id>`.
    pub deps: BTreeMap<String, String>,
    /// Output URI of every known input node.
    pub inputs: BTreeMap<NodeId, String>,
}

/// Final result of one node as reported by [`ExecutorAdapter::receive`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub output_uri: Option<String>,
    pub stdout_uri: Option<String>,
    pub stderr_uri: Option<String>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn completed(node_id: NodeId, output_uri: impl Into<String>) -> Self {
        Self {
            node_id,
            status: NodeStatus::Completed,
            output_uri: Some(output_uri.into()),
            stdout_uri: None,
            stderr_uri: None,
            error: None,
        }
    }

    pub fn failed(node_id: NodeId, error: impl Into<String>) -> Self {
        Self {
            node_id,
            status: NodeStatus::Failed,
            output_uri: None,
            stdout_uri: None,
            stderr_uri: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: NodeStatus::Cancelled,
            output_uri: None,
            stdout_uri: None,
            stderr_uri: None,
            error: None,
        }
    }
}

/// Opaque executor-defined job identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub Value);

impl JobHandle {
    /// Serialized form stored in the job record.
    pub fn to_record(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn from_record(raw: &str) -> Result<Self> {
        Ok(JobHandle(serde_json::from_str(raw)?))
    }
}

/// Result of a non-blocking readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    Running,
    /// Polling is not supported; completion arrives only by push.
    Unsupported,
}

impl PollStatus {
    /// Map a raw status code: `0` ready, `-1` unsupported, anything else running.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => PollStatus::Ready,
            -1 => PollStatus::Unsupported,
            _ => PollStatus::Running,
        }
    }
}

/// Capability interface over execution backends.
pub trait ExecutorAdapter: Send + Sync + Debug {
    /// Registry name of this executor.
    fn short_name(&self) -> &str;

    fn supports_managed_execution(&self) -> bool {
        false
    }

    /// Direct model: run one function with resolved inputs.
    fn execute<'a>(
        &'a self,
        _function: &'a str,
        _args: Vec<Value>,
        _kwargs: BTreeMap<String, Value>,
    ) -> BoxFuture<'a, Result<Value>> {
        let err = unsupported(self.short_name(), "direct execution");
        Box::pin(async move { Err(err) })
    }

    /// Allocate a destination URI for an asset the caller will push.
    fn get_upload_uri(&self, _meta: &TaskGroupMetadata, _asset_key: &str) -> Result<String> {
        Err(unsupported(self.short_name(), "asset upload"))
    }

    /// Submit a whole task group. Resubmitting the same group must not
    /// corrupt executor state.
    fn send<'a>(
        &'a self,
        _tasks: &'a [TaskSpec],
        _resources: &'a ResourceMap,
        _meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>> {
        let err = unsupported(self.short_name(), "task group submission");
        Box::pin(async move { Err(err) })
    }

    fn poll<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        _handle: &'a JobHandle,
    ) -> BoxFuture<'a, Result<PollStatus>> {
        Box::pin(async move { Ok(PollStatus::Unsupported) })
    }

    /// Fetch per-node results after the group reached a terminal state.
    fn receive<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        _handle: &'a JobHandle,
        _status: NodeStatus,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>> {
        let err = unsupported(self.short_name(), "result retrieval");
        Box::pin(async move { Err(err) })
    }

    /// Best-effort cancellation. May block; only ever called from the
    /// cancel worker pool.
    fn cancel(&self, _handle: &JobHandle) -> Result<bool> {
        Ok(false)
    }
}

fn unsupported(executor: &str, operation: &'static str) -> DispatchError {
    DispatchError::Unsupported {
        executor: executor.to_string(),
        operation,
    }
}
