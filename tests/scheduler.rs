// tests/scheduler.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use flowdispatch::dag::{DependencyGraph, ExecutorSelection, Node, Scheduler};
use flowdispatch::engine::{CoreCommand, DispatchCore, DispatchEvent};
use flowdispatch::types::{DispatchStatus, NodeId, NodeStatus};

/// 0 (param) -> 1 -> 3
/// 0 (param) -> 2 -> 3
fn diamond() -> Arc<DependencyGraph> {
    Arc::new(DependencyGraph::new(
        [
            Node::parameter(0, "x", json!(2)),
            Node::function(1, "left", "square").with_args([0]),
            Node::function(2, "right", "identity").with_args([0]),
            Node::function(3, "join", "add").with_args([1, 2]),
        ],
        [],
    ))
}

fn group_ids(step: &flowdispatch::dag::SchedulerStep) -> Vec<NodeId> {
    step.groups.iter().map(|g| g.task_group_id).collect()
}

#[test]
fn start_releases_parameters_only() {
    let mut scheduler = Scheduler::new(diamond());
    let step = scheduler.step_start();

    assert_eq!(step.parameters, vec![0]);
    assert!(step.groups.is_empty());
    assert_eq!(step.run_just_finished, None);
    assert_eq!(scheduler.status_of(0), Some(NodeStatus::Running));
}

#[test]
fn completed_inputs_release_dependents() {
    let mut scheduler = Scheduler::new(diamond());
    scheduler.step_start();

    let step = scheduler.step_settled(0, &[(0, NodeStatus::Completed)]);
    assert_eq!(group_ids(&step), vec![1, 2]);
    assert_eq!(step.groups[0].known, vec![0]);
    assert_eq!(scheduler.in_flight().collect::<BTreeSet<_>>(), BTreeSet::from([1, 2]));

    let step = scheduler.step_settled(1, &[(1, NodeStatus::Completed)]);
    assert!(step.groups.is_empty(), "3 still waits for 2");
    assert_eq!(scheduler.in_flight().collect::<Vec<_>>(), vec![2]);

    let step = scheduler.step_settled(2, &[(2, NodeStatus::Completed)]);
    assert_eq!(group_ids(&step), vec![3]);
    assert_eq!(step.groups[0].known, vec![1, 2]);

    let step = scheduler.step_settled(3, &[(3, NodeStatus::Completed)]);
    assert_eq!(step.run_just_finished, Some(DispatchStatus::Completed));
}

#[test]
fn failure_cancels_downstream_and_finishes_failed() {
    let mut scheduler = Scheduler::new(diamond());
    scheduler.step_start();
    scheduler.step_settled(0, &[(0, NodeStatus::Completed)]);

    let step = scheduler.step_settled(1, &[(1, NodeStatus::Failed)]);
    assert_eq!(step.newly_cancelled, vec![3]);
    assert_eq!(scheduler.status_of(3), Some(NodeStatus::Cancelled));
    assert_eq!(step.run_just_finished, None, "2 is still in flight");

    let step = scheduler.step_settled(2, &[(2, NodeStatus::Completed)]);
    assert!(step.groups.is_empty());
    assert_eq!(step.run_just_finished, Some(DispatchStatus::Failed));
}

#[test]
fn duplicate_settlement_is_ignored() {
    let mut scheduler = Scheduler::new(diamond());
    scheduler.step_start();
    let first = scheduler.step_settled(0, &[(0, NodeStatus::Completed)]);
    assert_eq!(first.groups.len(), 2);

    let again = scheduler.step_settled(0, &[(0, NodeStatus::Completed)]);
    assert!(again.is_empty());
}

#[test]
fn non_terminal_outcome_counts_as_failed() {
    let mut scheduler = Scheduler::new(diamond());
    scheduler.step_start();
    scheduler.step_settled(0, &[(0, NodeStatus::Completed)]);

    let step = scheduler.step_settled(1, &[(1, NodeStatus::Running)]);
    assert_eq!(scheduler.status_of(1), Some(NodeStatus::Failed));
    assert_eq!(step.newly_cancelled, vec![3]);
}

#[test]
fn cancelled_only_dispatch_is_cancelled() {
    let graph = Arc::new(DependencyGraph::new(
        [
            Node::function(0, "a", "identity"),
            Node::function(1, "b", "identity").with_args([0]),
        ],
        [],
    ));
    let mut scheduler = Scheduler::new(graph);
    let step = scheduler.step_start();
    assert_eq!(group_ids(&step), vec![0]);

    let step = scheduler.step_settled(0, &[(0, NodeStatus::Cancelled)]);
    assert_eq!(step.newly_cancelled, vec![1]);
    assert_eq!(step.run_just_finished, Some(DispatchStatus::Cancelled));
}

#[test]
fn packed_group_waits_for_every_member() {
    let batch = ExecutorSelection::named("batch");
    let graph = Arc::new(DependencyGraph::new(
        [
            Node::parameter(0, "x", json!(1)),
            Node::function(1, "slow", "identity").with_args([0]),
            Node::function(2, "p", "square")
                .with_args([0])
                .with_executor(batch.clone())
                .in_task_group(2),
            Node::function(3, "q", "identity")
                .with_args([1])
                .with_executor(batch)
                .in_task_group(2),
        ],
        [],
    ));
    let mut scheduler = Scheduler::new(graph);
    scheduler.step_start();

    let step = scheduler.step_settled(0, &[(0, NodeStatus::Completed)]);
    assert_eq!(group_ids(&step), vec![1], "group 2 waits for q's input");

    let step = scheduler.step_settled(1, &[(1, NodeStatus::Completed)]);
    assert_eq!(group_ids(&step), vec![2]);
    let group = &step.groups[0];
    assert_eq!(group.node_ids(), vec![2, 3]);
    assert_eq!(group.executor.name, "batch");
    assert_eq!(group.known, vec![0, 1]);
}

#[test]
fn core_orders_commands_cancel_first() {
    let mut core = DispatchCore::new(diamond());
    let start = core.step(DispatchEvent::Start);
    assert_eq!(start.commands, vec![CoreCommand::CompleteParameters(vec![0])]);
    assert!(start.keep_running);

    core.step(DispatchEvent::GroupSettled {
        task_group_id: 0,
        outcomes: vec![(0, NodeStatus::Completed)],
    });
    let step = core.step(DispatchEvent::GroupSettled {
        task_group_id: 1,
        outcomes: vec![(1, NodeStatus::Failed)],
    });
    assert_eq!(step.commands, vec![CoreCommand::CancelNodes(vec![3])]);

    let step = core.step(DispatchEvent::GroupSettled {
        task_group_id: 2,
        outcomes: vec![(2, NodeStatus::Completed)],
    });
    assert_eq!(step.commands, vec![CoreCommand::Finish(DispatchStatus::Failed)]);
    assert!(!step.keep_running);
    assert_eq!(core.finished(), Some(DispatchStatus::Failed));
    assert_eq!(core.scheduler().status_of(3), Some(NodeStatus::Cancelled));
}

#[test]
fn core_shutdown_stops_immediately() {
    let mut core = DispatchCore::new(diamond());
    core.step(DispatchEvent::Start);

    let step = core.step(DispatchEvent::ShutdownRequested);
    assert!(!step.keep_running);
    assert_eq!(step.commands, vec![CoreCommand::Finish(DispatchStatus::Failed)]);
}

fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = (Vec<Vec<NodeId>>, Vec<bool>)> {
    (1..=max_nodes).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::vec(proptest::bool::weighted(0.2), n),
        )
            .prop_map(|(raw, fails)| {
                let deps = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            Vec::new()
                        } else {
                            picks
                                .into_iter()
                                .map(|p| p % i)
                                .collect::<BTreeSet<_>>()
                                .into_iter()
                                .collect()
                        }
                    })
                    .collect();
                (deps, fails)
            })
    })
}

proptest! {
    /// Settling every submitted group eventually finishes the dispatch with
    /// every node terminal, and never submits a group twice.
    #[test]
    fn scheduler_always_terminates((deps, fails) in dag_strategy(12)) {
        let nodes = deps.iter().enumerate().map(|(i, d)| {
            Node::function(i, format!("n{i}"), "identity").with_args(d.clone())
        });
        let graph = Arc::new(DependencyGraph::new(nodes, []));
        let mut scheduler = Scheduler::new(Arc::clone(&graph));

        let mut submitted: BTreeSet<NodeId> = BTreeSet::new();
        let mut pending: Vec<NodeId> = Vec::new();
        let mut finished = None;

        let step = scheduler.step_start();
        for g in &step.groups {
            prop_assert!(submitted.insert(g.task_group_id));
            pending.push(g.task_group_id);
        }
        finished = finished.or(step.run_just_finished);

        while let Some(gid) = pending.pop() {
            let status = if fails[gid] { NodeStatus::Failed } else { NodeStatus::Completed };
            let step = scheduler.step_settled(gid, &[(gid, status)]);
            for g in &step.groups {
                prop_assert!(submitted.insert(g.task_group_id), "group {} submitted twice", g.task_group_id);
                pending.push(g.task_group_id);
            }
            if step.run_just_finished.is_some() {
                prop_assert!(finished.is_none());
                finished = step.run_just_finished;
            }
        }

        prop_assert!(finished.is_some());
        for id in graph.node_ids() {
            let status = scheduler.status_of(id).expect("status");
            prop_assert!(status.is_terminal(), "node {} ended {}", id, status);
        }
        let expected = if fails.iter().enumerate().any(|(i, &f)| f && submitted.contains(&i)) {
            DispatchStatus::Failed
        } else {
            DispatchStatus::Completed
        };
        prop_assert_eq!(finished, Some(expected));
    }
}
