// src/dag/state_manager.rs

//! Per-dispatch state transitions for the scheduler.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::task_group::ScheduledGroup;
use crate::types::{NodeId, NodeStatus};

/// Mutable view over the scheduler's node statuses and in-flight groups.
pub struct StateManager<'a> {
    graph: &'a DependencyGraph,
    statuses: &'a mut HashMap<NodeId, NodeStatus>,
    in_flight: &'a mut BTreeSet<NodeId>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        statuses: &'a mut HashMap<NodeId, NodeStatus>,
        in_flight: &'a mut BTreeSet<NodeId>,
    ) -> Self {
        Self {
            graph,
            statuses,
            in_flight,
        }
    }

    fn status_of(&self, id: NodeId) -> NodeStatus {
        self.statuses.get(&id).copied().unwrap_or(NodeStatus::New)
    }

    /// Record the terminal statuses of a settled group.
    ///
    /// Returns the members that ended in a failure status. A member that is
    /// reported as still active is counted as FAILED so the dispatch cannot
    /// hang on it.
    pub fn record_outcomes(&mut self, outcomes: &[(NodeId, NodeStatus)]) -> Vec<NodeId> {
        let mut failed = Vec::new();
        for &(id, status) in outcomes {
            let status = if status.is_terminal() {
                status
            } else {
                warn!(
                    node_id = id,
                    %status,
                    "settled group reported a non-terminal node; treating as FAILED"
                );
                NodeStatus::Failed
            };
            self.statuses.insert(id, status);
            if status.is_failure() {
                failed.push(id);
            }
        }
        failed
    }

    /// Cancel every NEW descendant of the given nodes.
    ///
    /// Returns the nodes newly marked CANCELLED.
    pub fn mark_dependents_cancelled(&mut self, failed: &[NodeId]) -> Vec<NodeId> {
        let mut stack: Vec<NodeId> = failed
            .iter()
            .flat_map(|&id| self.graph.successors(id))
            .collect();
        let mut newly_cancelled = Vec::new();

        while let Some(id) = stack.pop() {
            if self.status_of(id) != NodeStatus::New {
                continue;
            }
            self.statuses.insert(id, NodeStatus::Cancelled);
            debug!(node_id = id, "cancelling node due to upstream failure");
            newly_cancelled.push(id);
            stack.extend(self.graph.successors(id));
        }

        newly_cancelled.sort_unstable();
        newly_cancelled
    }

    /// Collect task groups whose NEW members are all runnable, mark those
    /// members RUNNING and the groups in flight.
    ///
    /// Members already terminal (cancelled by an upstream failure) are left
    /// out of the submission. Parameter nodes are returned separately.
    pub fn collect_ready_groups(&mut self) -> (Vec<NodeId>, Vec<ScheduledGroup>) {
        let mut candidates: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

        for (gid, members) in self.graph.task_groups() {
            if self.in_flight.contains(&gid) {
                continue;
            }
            let pending: Vec<NodeId> = members
                .iter()
                .copied()
                .filter(|&id| self.status_of(id) == NodeStatus::New)
                .collect();
            if pending.is_empty() {
                continue;
            }
            let statuses = &*self.statuses;
            let status_of = |id: NodeId| statuses.get(&id).copied().unwrap_or(NodeStatus::New);
            if pending.iter().all(|&id| self.graph.is_runnable(id, status_of)) {
                candidates.push((gid, pending));
            }
        }

        let mut parameters = Vec::new();
        let mut groups = Vec::new();

        for (gid, pending) in candidates {
            for &id in &pending {
                self.statuses.insert(id, NodeStatus::Running);
            }
            self.in_flight.insert(gid);

            let is_parameter = pending.len() == 1
                && self
                    .graph
                    .node(pending[0])
                    .is_some_and(|node| node.is_parameter());
            if is_parameter {
                debug!(node_id = pending[0], "parameter node ready");
                parameters.push(pending[0]);
                continue;
            }

            let group = ScheduledGroup::from_members(self.graph, gid, &pending);
            info!(
                task_group_id = gid,
                nodes = ?pending,
                executor = %group.executor.name,
                "task group ready for submission"
            );
            groups.push(group);
        }

        (parameters, groups)
    }

    /// True once every node is terminal and nothing is in flight.
    pub fn all_nodes_terminal(&self) -> bool {
        self.in_flight.is_empty()
            && self
                .graph
                .node_ids()
                .all(|id| self.status_of(id).is_terminal())
    }
}
