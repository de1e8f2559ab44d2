// src/dag/scheduler.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::types::{DispatchStatus, NodeId, NodeStatus};

/// Scheduler holds the immutable DAG plus the mutable state of one dispatch.
///
/// It is responsible for:
/// - deciding which task groups are ready (every NEW member runnable)
/// - recording the terminal statuses of settled groups
/// - cancelling nodes downstream of a failure
/// - deciding when the dispatch is finished, and with which status
///
/// It performs no IO; the engine feeds it settled groups and executes the
/// steps it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    statuses: HashMap<NodeId, NodeStatus>,
    /// Task group ids submitted and not yet settled.
    in_flight: BTreeSet<NodeId>,
    started: bool,
    finished: Option<DispatchStatus>,
}

impl Scheduler {
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        let statuses = graph.node_ids().map(|id| (id, NodeStatus::New)).collect();
        Self {
            graph,
            statuses,
            in_flight: BTreeSet::new(),
            started: false,
            finished: None,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn status_of(&self, id: NodeId) -> Option<NodeStatus> {
        self.statuses.get(&id).copied()
    }

    pub fn statuses(&self) -> &HashMap<NodeId, NodeStatus> {
        &self.statuses
    }

    pub fn in_flight(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.in_flight.iter().copied()
    }

    /// Final status, once the dispatch has finished.
    pub fn finished(&self) -> Option<DispatchStatus> {
        self.finished
    }

    /// Schedule the initial frontier.
    pub fn step_start(&mut self) -> SchedulerStep {
        if self.started {
            warn!("scheduler already started; ignoring start");
            return SchedulerStep::default();
        }
        self.started = true;
        info!(nodes = self.graph.len(), "scheduler: starting dispatch");

        let mut manager = StateManager::new(&self.graph, &mut self.statuses, &mut self.in_flight);
        let (parameters, groups) = manager.collect_ready_groups();

        SchedulerStep {
            parameters,
            groups,
            newly_cancelled: Vec::new(),
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Record that a task group reached a terminal state.
    ///
    /// `outcomes` holds the persisted status of every member. Settlements for
    /// groups that are not in flight (duplicate notifications) are ignored.
    pub fn step_settled(
        &mut self,
        task_group_id: NodeId,
        outcomes: &[(NodeId, NodeStatus)],
    ) -> SchedulerStep {
        if !self.in_flight.remove(&task_group_id) {
            debug!(
                task_group_id,
                "settlement for a group that is not in flight; ignoring"
            );
            return SchedulerStep::default();
        }

        let mut manager = StateManager::new(&self.graph, &mut self.statuses, &mut self.in_flight);
        let failed = manager.record_outcomes(outcomes);
        if !failed.is_empty() {
            warn!(
                task_group_id,
                nodes = ?failed,
                "task group members did not complete; cancelling dependents"
            );
        }
        let newly_cancelled = manager.mark_dependents_cancelled(&failed);
        let (parameters, groups) = manager.collect_ready_groups();

        SchedulerStep {
            parameters,
            groups,
            newly_cancelled,
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Finish the dispatch once nothing is in flight.
    ///
    /// If nodes are still NEW at that point they can never become runnable;
    /// the dispatch is finished anyway and counts them as unfinished.
    fn maybe_finish_run(&mut self) -> Option<DispatchStatus> {
        if self.finished.is_some() || !self.in_flight.is_empty() {
            return None;
        }

        let manager = StateManager::new(&self.graph, &mut self.statuses, &mut self.in_flight);
        if !manager.all_nodes_terminal() {
            let stuck: Vec<NodeId> = self
                .statuses
                .iter()
                .filter(|(_, s)| !s.is_terminal())
                .map(|(&id, _)| id)
                .collect();
            warn!(nodes = ?stuck, "dispatch stalled with unfinished nodes");
        }

        let status = DispatchStatus::from_node_statuses(self.statuses.values().copied());
        info!(%status, "scheduler: dispatch finished");
        self.finished = Some(status);
        Some(status)
    }
}
