// src/engine/runtime.rs

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{DependencyGraph, ScheduledGroup};
use crate::engine::context::DispatchContext;
use crate::engine::core::DispatchCore;
use crate::engine::dispatcher::DispatchOutcome;
use crate::engine::runner;
use crate::engine::{CoreCommand, DispatchEvent, RuntimeEvent};
use crate::errors::Result;
use crate::store::generate_node_result;
use crate::types::{AssetKind, DispatchId, DispatchStatus, NodeId, NodeStatus};

/// Drives one dispatch: feeds settled groups into the [`DispatchCore`] and
/// executes the commands it returns.
///
/// This is a pure IO shell around the core, which contains all the
/// scheduling semantics.
pub struct Runtime {
    core: DispatchCore,
    ctx: Arc<DispatchContext>,
    dispatch_id: DispatchId,
    graph: Arc<DependencyGraph>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Events produced by the shell itself (completed parameter nodes).
    pending: VecDeque<RuntimeEvent>,
    finished: Option<DispatchStatus>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("dispatch_id", &self.dispatch_id)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        ctx: Arc<DispatchContext>,
        dispatch_id: impl Into<DispatchId>,
        graph: Arc<DependencyGraph>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
    ) -> Self {
        Self {
            core: DispatchCore::new(Arc::clone(&graph)),
            ctx,
            dispatch_id: dispatch_id.into(),
            graph,
            event_rx,
            pending: VecDeque::new(),
            finished: None,
        }
    }

    /// Main event loop.
    ///
    /// - Starts the core, then consumes `RuntimeEvent`s.
    /// - Feeds them into the core.
    /// - Executes the commands it returns until the dispatch finishes.
    pub async fn run(mut self) -> Result<DispatchOutcome> {
        info!(dispatch_id = %self.dispatch_id, nodes = self.graph.len(), "dispatch runtime started");

        let mut step = self.core.step(DispatchEvent::Start);
        loop {
            for command in step.commands {
                self.execute_command(command).await?;
            }
            if !step.keep_running {
                break;
            }

            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    None => {
                        warn!(dispatch_id = %self.dispatch_id, "runtime event channel closed; exiting");
                        break;
                    }
                },
            };
            debug!(dispatch_id = %self.dispatch_id, ?event, "runtime received event");

            let event = self.resolve(event).await?;
            step = self.core.step(event);
        }

        let node_statuses: BTreeMap<NodeId, NodeStatus> = self
            .core
            .scheduler()
            .statuses()
            .iter()
            .map(|(&id, &status)| (id, status))
            .collect();
        let status = self
            .finished
            .unwrap_or_else(|| DispatchStatus::from_node_statuses(node_statuses.values().copied()));

        info!(dispatch_id = %self.dispatch_id, %status, "dispatch runtime exiting");
        Ok(DispatchOutcome {
            dispatch_id: self.dispatch_id,
            status,
            node_statuses,
        })
    }

    /// Turn a notification into a core event, reading the persisted
    /// statuses of a settled group's members.
    async fn resolve(&self, event: RuntimeEvent) -> Result<DispatchEvent> {
        match event {
            RuntimeEvent::GroupSettled {
                task_group_id,
                node_ids,
            } => {
                let mut outcomes = Vec::with_capacity(node_ids.len());
                for node_id in node_ids {
                    let result = self
                        .ctx
                        .results
                        .get_node_result(&self.dispatch_id, node_id)
                        .await?;
                    outcomes.push((node_id, result.status));
                }
                Ok(DispatchEvent::GroupSettled {
                    task_group_id,
                    outcomes,
                })
            }
            RuntimeEvent::ShutdownRequested => Ok(DispatchEvent::ShutdownRequested),
        }
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::CancelNodes(node_ids) => self.cancel_nodes(node_ids).await?,
            CoreCommand::CompleteParameters(node_ids) => {
                self.complete_parameters(node_ids).await?
            }
            CoreCommand::SubmitGroups(groups) => self.submit_groups(groups),
            CoreCommand::Finish(status) => {
                info!(dispatch_id = %self.dispatch_id, %status, "core finished dispatch");
                self.finished = Some(status);
            }
        }
        Ok(())
    }

    async fn cancel_nodes(&self, node_ids: Vec<NodeId>) -> Result<()> {
        let now = Utc::now();
        for node_id in node_ids {
            debug!(dispatch_id = %self.dispatch_id, node_id, "persisting upstream cancellation");
            self.ctx
                .write_result(
                    &self.dispatch_id,
                    generate_node_result(node_id, NodeStatus::Cancelled).with_end_time(now),
                )
                .await?;
        }
        Ok(())
    }

    /// Parameter nodes complete with their constant value and settle
    /// without ever reaching an executor.
    async fn complete_parameters(&mut self, node_ids: Vec<NodeId>) -> Result<()> {
        for node_id in node_ids {
            let (value, task_group_id) = match self.graph.node(node_id) {
                Some(node) => (node.value.clone().unwrap_or(Value::Null), node.task_group_id),
                None => (Value::Null, node_id),
            };

            let uri = self
                .ctx
                .assets
                .stage(&self.dispatch_id, node_id, AssetKind::Output, value)
                .await?;
            let now = Utc::now();
            self.ctx
                .write_result(
                    &self.dispatch_id,
                    generate_node_result(node_id, NodeStatus::Completed)
                        .with_start_time(now)
                        .with_end_time(now)
                        .with_output_uri(Some(uri)),
                )
                .await?;

            self.pending.push_back(RuntimeEvent::GroupSettled {
                task_group_id,
                node_ids: vec![node_id],
            });
        }
        Ok(())
    }

    fn submit_groups(&self, groups: Vec<ScheduledGroup>) {
        for group in groups {
            debug!(
                dispatch_id = %self.dispatch_id,
                task_group_id = group.task_group_id,
                "spawning task group runner"
            );
            tokio::spawn(runner::run_task_group(
                Arc::clone(&self.ctx),
                self.dispatch_id.clone(),
                group,
            ));
        }
    }
}
