// src/dag/task_group.rs

//! Task groups as emitted by the scheduler.

use crate::dag::graph::DependencyGraph;
use crate::dag::node::ExecutorSelection;
use crate::exec::adapter::{TaskGroupMetadata, TaskSpec};
use crate::types::{DispatchId, NodeId};

/// A set of mutually independent nodes the scheduler wants submitted now,
/// together, to one executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledGroup {
    pub task_group_id: NodeId,
    /// One spec per member, in node id order.
    pub tasks: Vec<TaskSpec>,
    pub executor: ExecutorSelection,
    /// Producers outside the group whose outputs the members consume.
    pub known: Vec<NodeId>,
}

impl ScheduledGroup {
    /// Build a group from its members. `members` must be non-empty and
    /// share one executor selection.
    pub fn from_members(graph: &DependencyGraph, task_group_id: NodeId, members: &[NodeId]) -> Self {
        let tasks = members
            .iter()
            .filter_map(|&id| graph.node(id))
            .map(|node| TaskSpec::new(node.id, node.args.clone(), node.kwargs.clone()))
            .collect();

        let executor = members
            .first()
            .and_then(|&id| graph.node(id))
            .map(|node| node.executor.clone())
            .unwrap_or_else(|| ExecutorSelection::named("local"));

        Self {
            task_group_id,
            tasks,
            executor,
            known: graph.known_inputs(members),
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.tasks.iter().map(TaskSpec::node_id).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn metadata(&self, dispatch_id: &str) -> TaskGroupMetadata {
        TaskGroupMetadata {
            dispatch_id: DispatchId::from(dispatch_id),
            task_group_id: self.task_group_id,
            task_ids: self.node_ids(),
        }
    }
}
