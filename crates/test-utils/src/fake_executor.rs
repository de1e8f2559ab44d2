use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use flowdispatch::errors::{DispatchError, Result};
use flowdispatch::exec::{
    ExecutorAdapter, ExecutorEnv, ExecutorRegistry, JobHandle, PollStatus, ResourceMap,
    TaskGroupMetadata, TaskResult, TaskSpec,
};
use flowdispatch::types::{BoxFuture, NodeId, NodeStatus};

/// What the fake executor answers. Edit through [`FakeBackend::script`].
#[derive(Debug, Clone)]
pub struct FakeScript {
    /// `send` fails with this message.
    pub fail_send: Option<String>,
    /// `poll` fails with this message.
    pub fail_poll: Option<String>,
    pub poll_status: PollStatus,
    /// `send` pushes `Ready` on the job event bus before returning its
    /// handle, then lingers briefly.
    pub push_during_send: bool,
    /// `receive` fails with this message.
    pub fail_receive: Option<String>,
    /// Output written for a node at `send` time (default `null`).
    pub outputs: BTreeMap<NodeId, Value>,
    /// Nodes reported FAILED by `receive`, with their error.
    pub failures: BTreeMap<NodeId, String>,
    /// Nodes left out of the `receive` output.
    pub omitted: BTreeSet<NodeId>,
    /// Answer of `cancel`; `Err` makes the call fail.
    pub cancel_result: std::result::Result<bool, String>,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            fail_send: None,
            fail_poll: None,
            poll_status: PollStatus::Ready,
            push_during_send: false,
            fail_receive: None,
            outputs: BTreeMap::new(),
            failures: BTreeMap::new(),
            omitted: BTreeSet::new(),
            cancel_result: Ok(true),
        }
    }
}

/// Shared state behind every `fake` executor the registry builds:
/// - the script deciding the answers
/// - a log of the calls made, e.g. `send:3:[3, 4]`, `poll:3`, `cancel`
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    script: Arc<Mutex<FakeScript>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub const NAME: &'static str = "fake";

    pub fn new(script: FakeScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::default(),
        }
    }

    /// Register a `fake` factory in `registry`.
    pub fn register(&self, registry: &mut ExecutorRegistry) {
        let backend = self.clone();
        registry.register(Self::NAME, move |env: &ExecutorEnv, _config: &Value| {
            Ok(Arc::new(ScriptedExecutor {
                backend: backend.clone(),
                env: env.clone(),
            }) as Arc<dyn ExecutorAdapter>)
        });
    }

    pub fn script(&self, edit: impl FnOnce(&mut FakeScript)) {
        edit(&mut self.script.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose entry starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn current(&self) -> FakeScript {
        self.script.lock().unwrap().clone()
    }
}

/// Managed-model executor answering from a [`FakeScript`].
#[derive(Debug)]
pub struct ScriptedExecutor {
    backend: FakeBackend,
    env: ExecutorEnv,
}

fn output_uri(meta: &TaskGroupMetadata, node_id: NodeId) -> String {
    format!("fake://{}/node_{node_id}/output", meta.dispatch_id)
}

fn fake_error(message: &str) -> DispatchError {
    DispatchError::TaskFailed(message.to_string())
}

impl ExecutorAdapter for ScriptedExecutor {
    fn short_name(&self) -> &str {
        FakeBackend::NAME
    }

    fn supports_managed_execution(&self) -> bool {
        true
    }

    fn get_upload_uri(&self, meta: &TaskGroupMetadata, asset_key: &str) -> Result<String> {
        Ok(format!(
            "fake://{}/{}/assets/{asset_key}",
            meta.dispatch_id, meta.task_group_id
        ))
    }

    fn send<'a>(
        &'a self,
        tasks: &'a [TaskSpec],
        _resources: &'a ResourceMap,
        meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>> {
        Box::pin(async move {
            let ids: Vec<NodeId> = tasks.iter().map(TaskSpec::node_id).collect();
            self.backend
                .record(format!("send:{}:{ids:?}", meta.task_group_id));

            let script = self.backend.current();
            if let Some(message) = &script.fail_send {
                return Err(fake_error(message));
            }
            for &id in &ids {
                let value = script.outputs.get(&id).cloned().unwrap_or(Value::Null);
                self.env.assets.write_uri(&output_uri(meta, id), value).await?;
            }
            if script.push_during_send {
                self.env.events.mark_ready(meta.clone()).await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(JobHandle(json!({ "group": meta.task_group_id })))
        })
    }

    fn poll<'a>(
        &'a self,
        meta: &'a TaskGroupMetadata,
        _handle: &'a JobHandle,
    ) -> BoxFuture<'a, Result<PollStatus>> {
        Box::pin(async move {
            self.backend.record(format!("poll:{}", meta.task_group_id));
            let script = self.backend.current();
            match &script.fail_poll {
                Some(message) => Err(fake_error(message)),
                None => Ok(script.poll_status),
            }
        })
    }

    fn receive<'a>(
        &'a self,
        meta: &'a TaskGroupMetadata,
        _handle: &'a JobHandle,
        _status: NodeStatus,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>> {
        Box::pin(async move {
            self.backend
                .record(format!("receive:{}", meta.task_group_id));
            let script = self.backend.current();
            if let Some(message) = &script.fail_receive {
                return Err(fake_error(message));
            }
            Ok(meta
                .task_ids
                .iter()
                .filter(|id| !script.omitted.contains(id))
                .map(|&id| match script.failures.get(&id) {
                    Some(error) => TaskResult::failed(id, error.clone()),
                    None => TaskResult::completed(id, output_uri(meta, id)),
                })
                .collect())
        })
    }

    fn cancel(&self, _handle: &JobHandle) -> Result<bool> {
        self.backend.record("cancel".to_string());
        self.backend
            .current()
            .cancel_result
            .map_err(|message| fake_error(&message))
    }
}
