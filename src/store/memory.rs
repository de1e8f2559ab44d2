// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use super::{AssetTransfer, JobRecord, JobStore, NodeAttribute, NodeResult, NodeResultStore};
use crate::dag::node::Node;
use crate::errors::{DispatchError, Result};
use crate::types::{AssetKind, BoxFuture, NodeId};

type Key = (String, NodeId);

#[derive(Debug, Clone)]
struct NodeRecord {
    node: Node,
    result: NodeResult,
}

/// In-memory implementation of every collaborator contract.
///
/// Cloning is cheap and clones share state, so the same instance can be
/// handed to the dispatcher, to executors and to tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: Arc<Mutex<HashMap<Key, NodeRecord>>>,
    jobs: Arc<Mutex<HashMap<Key, JobRecord>>>,
    blobs: Arc<Mutex<HashMap<String, Value>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(dispatch_id: &str, node_id: NodeId) -> Key {
    (dispatch_id.to_string(), node_id)
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn attribute(&self, dispatch_id: &str, node_id: NodeId, attr: NodeAttribute) -> Result<Value> {
        let nodes = lock(&self.nodes);
        let record = nodes
            .get(&key(dispatch_id, node_id))
            .ok_or_else(|| DispatchError::NodeNotFound {
                dispatch_id: dispatch_id.to_string(),
                node_id,
            })?;

        let value = match attr {
            NodeAttribute::Name => Value::String(record.node.name.clone()),
            NodeAttribute::NodeType => serde_json::to_value(record.node.node_type)?,
            NodeAttribute::Function => opt_string(&record.node.function),
            NodeAttribute::Executor => Value::String(record.node.executor.name.clone()),
            NodeAttribute::ExecutorData => record.node.executor.config.clone(),
            NodeAttribute::TaskGroupId => Value::from(record.node.task_group_id),
            NodeAttribute::Status => Value::String(record.result.status.to_string()),
            NodeAttribute::StartTime => record
                .result
                .start_time
                .map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null),
            NodeAttribute::EndTime => record
                .result
                .end_time
                .map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null),
            NodeAttribute::Error => opt_string(&record.result.error),
            NodeAttribute::OutputUri => opt_string(&record.result.output_uri),
            NodeAttribute::StdoutUri => opt_string(&record.result.stdout_uri),
            NodeAttribute::StderrUri => opt_string(&record.result.stderr_uri),
        };
        Ok(value)
    }

    fn merge_result(&self, dispatch_id: &str, update: NodeResult) -> Result<bool> {
        let mut nodes = lock(&self.nodes);
        let record = nodes
            .get_mut(&key(dispatch_id, update.node_id))
            .ok_or_else(|| DispatchError::NodeNotFound {
                dispatch_id: dispatch_id.to_string(),
                node_id: update.node_id,
            })?;

        let current = record.result.status;
        if !current.can_transition_to(update.status) {
            debug!(
                dispatch_id,
                node_id = update.node_id,
                from = %current,
                to = %update.status,
                "ignoring node result update out of a terminal status"
            );
            return Ok(false);
        }

        let result = &mut record.result;
        result.status = update.status;
        if update.start_time.is_some() {
            result.start_time = update.start_time;
        }
        if update.end_time.is_some() {
            result.end_time = update.end_time;
        }
        if update.error.is_some() {
            result.error = update.error;
        }
        if update.output_uri.is_some() {
            result.output_uri = update.output_uri;
        }
        if update.stdout_uri.is_some() {
            result.stdout_uri = update.stdout_uri;
        }
        if update.stderr_uri.is_some() {
            result.stderr_uri = update.stderr_uri;
        }
        Ok(true)
    }

    fn with_job<R>(
        &self,
        dispatch_id: &str,
        node_id: NodeId,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R> {
        let mut jobs = lock(&self.jobs);
        let record = jobs
            .get_mut(&key(dispatch_id, node_id))
            .ok_or_else(|| DispatchError::JobNotFound {
                dispatch_id: dispatch_id.to_string(),
                node_id,
            })?;
        Ok(f(record))
    }

    fn read_blob(&self, uri: &str) -> Result<Value> {
        lock(&self.blobs)
            .get(uri)
            .cloned()
            .ok_or_else(|| DispatchError::AssetNotFound(uri.to_string()))
    }

    fn write_blob(&self, uri: &str, value: Value) {
        lock(&self.blobs).insert(uri.to_string(), value);
    }

    fn copy_blobs<'u>(&self, pairs: impl IntoIterator<Item = (String, &'u String)>) -> Result<()> {
        let mut blobs = lock(&self.blobs);
        for (src, dest) in pairs {
            let value = blobs
                .get(&src)
                .cloned()
                .ok_or_else(|| DispatchError::AssetNotFound(src.clone()))?;
            blobs.insert(dest.clone(), value);
        }
        Ok(())
    }
}

impl NodeResultStore for MemoryStore {
    fn register_node<'a>(
        &'a self,
        dispatch_id: &'a str,
        node: &'a Node,
    ) -> BoxFuture<'a, Result<()>> {
        let record = NodeRecord {
            node: node.clone(),
            result: super::generate_node_result(node.id, crate::types::NodeStatus::New),
        };
        lock(&self.nodes).insert(key(dispatch_id, node.id), record);
        Box::pin(future::ready(Ok(())))
    }

    fn get_attribute<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        key: NodeAttribute,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(future::ready(self.attribute(dispatch_id, node_id, key)))
    }

    fn update_node_result<'a>(
        &'a self,
        dispatch_id: &'a str,
        result: NodeResult,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(future::ready(self.merge_result(dispatch_id, result)))
    }

    fn get_node_result<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        let res = lock(&self.nodes)
            .get(&key(dispatch_id, node_id))
            .map(|r| r.result.clone())
            .ok_or_else(|| DispatchError::NodeNotFound {
                dispatch_id: dispatch_id.to_string(),
                node_id,
            });
        Box::pin(future::ready(res))
    }
}

impl JobStore for MemoryStore {
    fn create_job<'a>(&'a self, dispatch_id: &'a str, node_id: NodeId) -> BoxFuture<'a, Result<()>> {
        lock(&self.jobs).insert(key(dispatch_id, node_id), JobRecord::default());
        Box::pin(future::ready(Ok(())))
    }

    fn get_jobs_metadata<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_ids: &'a [NodeId],
    ) -> BoxFuture<'a, Result<Vec<JobRecord>>> {
        let jobs = lock(&self.jobs);
        let res = node_ids
            .iter()
            .map(|&node_id| {
                jobs.get(&key(dispatch_id, node_id))
                    .cloned()
                    .ok_or_else(|| DispatchError::JobNotFound {
                        dispatch_id: dispatch_id.to_string(),
                        node_id,
                    })
            })
            .collect::<Result<Vec<_>>>();
        drop(jobs);
        Box::pin(future::ready(res))
    }

    fn put_job_status<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        status: crate::types::NodeStatus,
    ) -> BoxFuture<'a, Result<()>> {
        let res = self.with_job(dispatch_id, node_id, |job| job.status = status);
        Box::pin(future::ready(res))
    }

    fn set_job_handle<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        job_handle: String,
    ) -> BoxFuture<'a, Result<()>> {
        let res = self.with_job(dispatch_id, node_id, |job| job.job_handle = Some(job_handle));
        Box::pin(future::ready(res))
    }

    fn set_cancel_requested<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
    ) -> BoxFuture<'a, Result<()>> {
        let res = self.with_job(dispatch_id, node_id, |job| job.cancel_requested = true);
        Box::pin(future::ready(res))
    }

    fn set_cancel_successful<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        successful: bool,
    ) -> BoxFuture<'a, Result<()>> {
        let res = self.with_job(dispatch_id, node_id, |job| job.cancel_successful = successful);
        Box::pin(future::ready(res))
    }
}

impl AssetTransfer for MemoryStore {
    fn local_uri(&self, dispatch_id: &str, node_id: NodeId, kind: AssetKind) -> String {
        format!("local://{dispatch_id}/node_{node_id}/{kind}")
    }

    fn stage<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        kind: AssetKind,
        value: Value,
    ) -> BoxFuture<'a, Result<String>> {
        let uri = self.local_uri(dispatch_id, node_id, kind);
        self.write_blob(&uri, value);
        Box::pin(future::ready(Ok(uri)))
    }

    fn load<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_id: NodeId,
        kind: AssetKind,
    ) -> BoxFuture<'a, Result<Value>> {
        let uri = self.local_uri(dispatch_id, node_id, kind);
        Box::pin(future::ready(self.read_blob(&uri)))
    }

    fn upload_asset_for_nodes<'a>(
        &'a self,
        dispatch_id: &'a str,
        kind: AssetKind,
        uris: &'a BTreeMap<NodeId, String>,
    ) -> BoxFuture<'a, Result<()>> {
        let res = self.copy_blobs(
            uris.iter()
                .map(|(&node_id, dest)| (self.local_uri(dispatch_id, node_id, kind), dest)),
        );
        Box::pin(future::ready(res))
    }

    fn download_asset_for_nodes<'a>(
        &'a self,
        dispatch_id: &'a str,
        kind: AssetKind,
        uris: &'a BTreeMap<NodeId, String>,
    ) -> BoxFuture<'a, Result<()>> {
        let res = (|| -> Result<()> {
            for (&node_id, src) in uris.iter() {
                let value = self.read_blob(src)?;
                self.write_blob(&self.local_uri(dispatch_id, node_id, kind), value);
            }
            Ok(())
        })();
        Box::pin(future::ready(res))
    }

    fn read_uri<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(future::ready(self.read_blob(uri)))
    }

    fn write_uri<'a>(&'a self, uri: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        self.write_blob(uri, value);
        Box::pin(future::ready(Ok(())))
    }
}
