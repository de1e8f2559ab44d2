// src/engine/dispatcher.rs

//! Long-lived owner of everything dispatches share.
//!
//! A [`Dispatcher`] owns the job event bus and its listener, the cancel
//! pool, the executor registry and the collaborator stores. Each call to
//! [`Dispatcher::dispatch`] drives one workflow graph to completion through
//! its own [`Runtime`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DispatcherSection;
use crate::dag::DependencyGraph;
use crate::engine::bus::{JobEventBus, JobEvents};
use crate::engine::context::DispatchContext;
use crate::engine::runtime::Runtime;
use crate::errors::{DispatchError, Result};
use crate::exec::{CancelPool, ExecutorRegistry};
use crate::store::{AssetTransfer, JobStore, MemoryStore, NodeAttribute, NodeResultStore};
use crate::types::{AssetKind, DispatchId, DispatchStatus, NodeId, NodeStatus};

/// Final state of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub dispatch_id: DispatchId,
    pub status: DispatchStatus,
    pub node_statuses: BTreeMap<NodeId, NodeStatus>,
}

#[derive(Debug)]
pub struct Dispatcher {
    ctx: Arc<DispatchContext>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Build a dispatcher and start its job event listener.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        settings: &DispatcherSection,
        results: Arc<dyn NodeResultStore>,
        jobs: Arc<dyn JobStore>,
        assets: Arc<dyn AssetTransfer>,
        registry: ExecutorRegistry,
    ) -> Result<Self> {
        let (events, bus) = JobEventBus::new(settings.event_bus_capacity);
        let cancel_pool = CancelPool::new(settings.cancel_workers, settings.event_bus_capacity)?;

        let ctx = Arc::new(DispatchContext::new(
            settings,
            results,
            jobs,
            assets,
            Arc::new(registry),
            events,
            cancel_pool,
        ));
        let listener = bus.spawn_listener(Arc::clone(&ctx));

        info!(
            cancel_workers = settings.cancel_workers,
            event_bus_capacity = settings.event_bus_capacity,
            "dispatcher started"
        );
        Ok(Self {
            ctx,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Dispatcher backed by one [`MemoryStore`] for all three contracts.
    pub fn in_memory(
        settings: &DispatcherSection,
        store: MemoryStore,
        registry: ExecutorRegistry,
    ) -> Result<Self> {
        Self::new(
            settings,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
            registry,
        )
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    /// Producer handle of the job event bus.
    pub fn events(&self) -> JobEvents {
        self.ctx.events.clone()
    }

    /// Initialise the records of every node before the dispatch starts:
    /// status NEW, an empty job record, and the function and hook payloads
    /// staged locally.
    pub async fn prepare(&self, dispatch_id: &str, graph: &DependencyGraph) -> Result<()> {
        let ctx = &self.ctx;
        for node in graph.nodes() {
            ctx.results.register_node(dispatch_id, node).await?;
            ctx.jobs.create_job(dispatch_id, node.id).await?;

            let Some(function) = &node.function else {
                continue;
            };
            for (kind, payload) in [
                (AssetKind::Function, Value::String(function.clone())),
                (AssetKind::Deps, Value::Null),
                (AssetKind::CallBefore, Value::Array(Vec::new())),
                (AssetKind::CallAfter, Value::Array(Vec::new())),
            ] {
                ctx.assets.stage(dispatch_id, node.id, kind, payload).await?;
            }
        }
        debug!(dispatch_id, nodes = graph.len(), "dispatch prepared");
        Ok(())
    }

    /// Drive an already prepared dispatch until every node is terminal (or a
    /// shutdown is requested).
    pub async fn run(&self, dispatch_id: &str, graph: Arc<DependencyGraph>) -> Result<DispatchOutcome> {
        let event_rx = self.ctx.attach_runtime(dispatch_id);
        let runtime = Runtime::new(Arc::clone(&self.ctx), dispatch_id, graph, event_rx);
        let outcome = runtime.run().await;
        self.ctx.detach_runtime(dispatch_id);
        outcome
    }

    /// Prepare and run a dispatch.
    pub async fn dispatch(
        &self,
        dispatch_id: impl Into<DispatchId>,
        graph: DependencyGraph,
    ) -> Result<DispatchOutcome> {
        let dispatch_id = dispatch_id.into();
        if graph.is_empty() {
            return Err(DispatchError::ConfigError(format!(
                "dispatch {dispatch_id} has no nodes"
            )));
        }
        self.prepare(&dispatch_id, &graph).await?;
        self.run(&dispatch_id, Arc::new(graph)).await
    }

    /// Request cancellation of nodes.
    ///
    /// The flag is set on each node and on its task group's representative,
    /// then the group's watch is woken. Groups not yet submitted are
    /// cancelled by the runner when it reaches them.
    pub async fn request_cancel(&self, dispatch_id: &str, node_ids: &[NodeId]) -> Result<()> {
        let ctx = &self.ctx;
        for &node_id in node_ids {
            let result = ctx.results.get_node_result(dispatch_id, node_id).await?;
            if result.status.is_terminal() {
                debug!(dispatch_id, node_id, status = %result.status, "node already terminal; not cancelling");
                continue;
            }

            let task_group_id = ctx
                .results
                .get_attribute(dispatch_id, node_id, NodeAttribute::TaskGroupId)
                .await?
                .as_u64()
                .and_then(|id| NodeId::try_from(id).ok())
                .unwrap_or(node_id);

            ctx.jobs.set_cancel_requested(dispatch_id, node_id).await?;
            if task_group_id != node_id {
                ctx.jobs.set_cancel_requested(dispatch_id, task_group_id).await?;
            }
            let signalled = ctx.watches.signal(dispatch_id, task_group_id);
            info!(dispatch_id, node_id, task_group_id, signalled, "cancellation requested");
        }
        Ok(())
    }

    /// Ask a running dispatch to stop without waiting for in-flight groups.
    pub async fn request_shutdown(&self, dispatch_id: &str) {
        self.ctx.request_shutdown(dispatch_id).await;
    }

    /// Stop the listener, every watch and the cancel pool.
    pub async fn shutdown(self) {
        if let Err(err) = self.ctx.events.shutdown().await {
            warn!(error = %err, "job event listener already gone");
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            if let Err(err) = listener.await {
                warn!(error = %err, "job event listener panicked");
            }
        }
        self.ctx.watches.stop_all();
        self.ctx.cancel_pool.shutdown().await;
        info!("dispatcher stopped");
    }
}
