// src/store/mod.rs

//! Contracts of the external collaborators the dispatcher depends on.
//!
//! - [`NodeResultStore`]: per-node status, timestamps and output references.
//! - [`JobStore`]: per-node job handle and cancellation flags.
//! - [`AssetTransfer`]: moves per-node payloads between local storage and
//!   executor-allocated URIs.
//!
//! Every method is a single read or write scoped to one node (or one set of
//! nodes for bulk asset moves); the dispatcher never needs cross-node
//! transactions. [`memory::MemoryStore`] implements all three in memory.

use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::node::Node;
use crate::errors::Result;
use crate::types::{AssetKind, BoxFuture, NodeId, NodeStatus};

pub mod memory;

pub use memory::MemoryStore;

/// A (partial) update of one node's result record.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output_uri: Option<String>,
    pub stdout_uri: Option<String>,
    pub stderr_uri: Option<String>,
}

/// Pure constructor for a [`NodeResult`] carrying only id and status.
pub fn generate_node_result(node_id: NodeId, status: NodeStatus) -> NodeResult {
    NodeResult {
        node_id,
        status,
        start_time: None,
        end_time: None,
        error: None,
        output_uri: None,
        stdout_uri: None,
        stderr_uri: None,
    }
}

impl NodeResult {
    pub fn with_start_time(mut self, ts: DateTime<Utc>) -> Self {
        self.start_time = Some(ts);
        self
    }

    pub fn with_end_time(mut self, ts: DateTime<Utc>) -> Self {
        self.end_time = Some(ts);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_output_uri(mut self, uri: Option<String>) -> Self {
        self.output_uri = uri;
        self
    }

    pub fn with_stdout_uri(mut self, uri: Option<String>) -> Self {
        self.stdout_uri = uri;
        self
    }

    pub fn with_stderr_uri(mut self, uri: Option<String>) -> Self {
        self.stderr_uri = uri;
        self
    }
}

/// Attribute keys readable through [`NodeResultStore::get_attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAttribute {
    Name,
    NodeType,
    Function,
    Executor,
    ExecutorData,
    TaskGroupId,
    Status,
    StartTime,
    EndTime,
    Error,
    OutputUri,
    StdoutUri,
    StderrUri,
}

/// Job metadata for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Executor-defined handle, serialized as JSON.
    pub job_handle: Option<String>,
    pub status: NodeStatus,
    pub cancel_requested: bool,
    pub cancel_successful: bool,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            job_handle: None,
            status: NodeStatus::New,
            cancel_requested: false,
            cancel_successful: false,
        }
    }
}

/// Record of each node's status, timestamps and output references.
pub trait NodeResultStore: Send + Sync + Debug {
    /// Create (or reset) the record for `node` with status `New`.
    fn register_node<'a>(&'a self, dispatch_id: &'a str, node: &'a Node)
    -> BoxFuture<'a, Result<()>>;

    fn get_attribute<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        key: NodeAttribute,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Merge `result` into the stored record.
    ///
    /// Returns `false` (and changes nothing) when the write would move the
    /// node backwards or out of a terminal status.
    fn update_node_result<'a>(
        &'a self,
        dispatch_id: &'a str,
        result: NodeResult,
    ) -> BoxFuture<'a, Result<bool>>;

    fn get_node_result<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
    ) -> BoxFuture<'a, Result<NodeResult>>;
}

/// Job handles and cancellation flags, one record per node.
pub trait JobStore: Send + Sync + Debug {
    fn create_job<'a>(&'a self, dispatch_id: &'a str, node_id: NodeId)
    -> BoxFuture<'a, Result<()>>;

    fn get_jobs_metadata<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_ids: &'a [NodeId],
    ) -> BoxFuture<'a, Result<Vec<JobRecord>>>;

    fn put_job_status<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        status: NodeStatus,
    ) -> BoxFuture<'a, Result<()>>;

    fn set_job_handle<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        job_handle: String,
    ) -> BoxFuture<'a, Result<()>>;

    fn set_cancel_requested<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
    ) -> BoxFuture<'a, Result<()>>;

    fn set_cancel_successful<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        successful: bool,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Moves per-node payloads between local storage and remote URIs.
pub trait AssetTransfer: Send + Sync + Debug {
    /// Where the local copy of a node's asset lives.
    fn local_uri(&self, dispatch_id: &str, node_id: NodeId, kind: AssetKind) -> String;

    /// Write the local copy of a node's asset; returns its local URI.
    fn stage<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        kind: AssetKind,
        value: Value,
    ) -> BoxFuture<'a, Result<String>>;

    /// Read the local copy of a node's asset.
    fn load<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        kind: AssetKind,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Push each node's local asset to the given destination URI.
    fn upload_asset_for_nodes<'a>(
        &'a self,
        dispatch_id: &'a str,
        kind: AssetKind,
        uris: &'a BTreeMap<NodeId, String>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Pull each node's asset from the given source URI into local storage.
    fn download_asset_for_nodes<'a>(
        &'a self,
        dispatch_id: &'a str,
        kind: AssetKind,
        uris: &'a BTreeMap<NodeId, String>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Executor-side read of an arbitrary URI.
    fn read_uri<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Value>>;

    /// Executor-side write of an arbitrary URI.
    fn write_uri<'a>(&'a self, uri: &'a str, value: Value) -> BoxFuture<'a, Result<()>>;
}
