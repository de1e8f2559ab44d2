// tests/graph.rs

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use serde_json::json;

use flowdispatch::dag::{DependencyGraph, Node, NodeType, ParamType};
use flowdispatch::types::{NodeId, NodeStatus};
use flowdispatch_test_utils::builders::{NodeConfigBuilder, WorkflowFileBuilder};

/// x(0) -> square(1) -> multiply(2) <- x(0)
fn square_then_multiply() -> DependencyGraph {
    DependencyGraph::new(
        [
            Node::parameter(0, "x", json!(3)),
            Node::function(1, "sq", "square").with_args([0]),
            Node::function(2, "mul", "multiply").with_args([0, 1]),
        ],
        [],
    )
}

#[test]
fn levels_follow_dependencies() {
    let graph = square_then_multiply();
    let levels: Vec<BTreeSet<NodeId>> = graph.topologically_sorted_levels().collect();

    assert_eq!(
        levels,
        vec![
            BTreeSet::from([0]),
            BTreeSet::from([1]),
            BTreeSet::from([2]),
        ]
    );
}

#[test]
fn levels_are_restartable() {
    let graph = square_then_multiply();

    let mut first = graph.topologically_sorted_levels();
    assert_eq!(first.next(), Some(BTreeSet::from([0])));

    let again: Vec<_> = graph.topologically_sorted_levels().collect();
    assert_eq!(again.len(), 3);
    assert_eq!(first.next(), Some(BTreeSet::from([1])));
}

#[test]
fn independent_nodes_share_a_level() {
    let graph = DependencyGraph::new(
        [
            Node::parameter(0, "a", json!(1)),
            Node::parameter(1, "b", json!(2)),
            Node::function(2, "sum", "add").with_args([0, 1]),
        ],
        [],
    );
    let levels: Vec<_> = graph.topologically_sorted_levels().collect();
    assert_eq!(levels[0], BTreeSet::from([0, 1]));
    assert_eq!(levels[1], BTreeSet::from([2]));
}

#[test]
fn descendants_cover_every_transitive_consumer() {
    let graph = square_then_multiply();

    assert_eq!(graph.descendants(0), BTreeSet::from([1, 2]));
    assert_eq!(graph.descendants(1), BTreeSet::from([2]));
    assert!(graph.descendants(2).is_empty());
}

#[test]
fn runnable_requires_new_and_completed_predecessors() {
    let graph = square_then_multiply();
    let mut statuses: HashMap<NodeId, NodeStatus> =
        graph.node_ids().map(|id| (id, NodeStatus::New)).collect();
    let status = |s: &HashMap<NodeId, NodeStatus>| {
        let s = s.clone();
        move |id: NodeId| s[&id]
    };

    assert!(graph.is_runnable(0, status(&statuses)));
    assert!(!graph.is_runnable(1, status(&statuses)));

    statuses.insert(0, NodeStatus::Completed);
    assert!(graph.is_runnable(1, status(&statuses)));
    assert!(!graph.is_runnable(2, status(&statuses)), "1 is still NEW");

    statuses.insert(1, NodeStatus::Failed);
    assert!(!graph.is_runnable(2, status(&statuses)));
    assert!(graph.has_failed_predecessor(2, status(&statuses)));

    statuses.insert(0, NodeStatus::Running);
    assert!(!graph.is_runnable(0, status(&statuses)), "only NEW nodes are runnable");
}

#[test]
fn edges_carry_binding_metadata() {
    let graph = DependencyGraph::new(
        [
            Node::parameter(0, "a", json!(1)),
            Node::parameter(1, "b", json!(2)),
            Node::function(2, "f", "add").with_args([0]).with_kwarg("y", 1),
            Node::function(3, "g", "identity").with_args([2]),
        ],
        [(1, 3)],
    );

    let into_f: Vec<_> = graph.edges().iter().filter(|e| e.target == 2).collect();
    assert_eq!(into_f.len(), 2);
    let positional = into_f
        .iter()
        .find(|e| e.metadata.param_type == ParamType::Positional)
        .expect("positional edge");
    assert_eq!(positional.source, 0);
    assert_eq!(positional.metadata.arg_index, Some(0));
    let keyword = into_f
        .iter()
        .find(|e| e.metadata.param_type == ParamType::Keyword)
        .expect("keyword edge");
    assert_eq!(keyword.metadata.edge_name, "y");

    let closure = graph
        .edges()
        .iter()
        .find(|e| e.metadata.param_type == ParamType::Closure)
        .expect("closure edge");
    assert_eq!((closure.source, closure.target), (1, 3));
    assert_eq!(graph.predecessors(3).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn from_config_lifts_constant_bindings() {
    let workflow = WorkflowFileBuilder::new()
        .with_node("a", NodeConfigBuilder::parameter(1).build())
        .with_node(
            "b",
            NodeConfigBuilder::function("add").arg("a").arg_value(2).build(),
        )
        .build();
    let graph = DependencyGraph::from_config(&workflow);

    assert_eq!(graph.len(), 3);
    let b = graph.node(graph.node_id("b").expect("b")).expect("node b");
    assert_eq!(b.args.len(), 2);

    let lifted = graph.node(b.args[1]).expect("lifted node");
    assert_eq!(lifted.node_type, NodeType::Parameter);
    assert_eq!(lifted.value, Some(json!(2)));
    assert_eq!(lifted.name, "b.args[1]");

    let levels: Vec<_> = graph.topologically_sorted_levels().collect();
    assert_eq!(levels.len(), 2);
    assert!(levels[1].contains(&b.id));
}

#[test]
fn from_config_assigns_task_group_representatives() {
    let workflow = WorkflowFileBuilder::new()
        .with_node("x", NodeConfigBuilder::parameter(2).build())
        .with_node(
            "p",
            NodeConfigBuilder::function("square").arg("x").task_group("g").build(),
        )
        .with_node(
            "q",
            NodeConfigBuilder::function("identity").arg("x").task_group("g").build(),
        )
        .build();
    let graph = DependencyGraph::from_config(&workflow);

    let p = graph.node_id("p").expect("p");
    let q = graph.node_id("q").expect("q");
    let groups = graph.task_groups();
    assert_eq!(groups.get(&p), Some(&vec![p, q]));
    assert_eq!(graph.node(q).expect("q").task_group_id, p);
    assert_eq!(graph.known_inputs(&[p, q]), vec![graph.node_id("x").expect("x")]);
}

#[test]
fn builtin_kinds_default_their_function() {
    let workflow = WorkflowFileBuilder::new()
        .with_node("obj", NodeConfigBuilder::parameter(1).build())
        .with_node(
            "item",
            NodeConfigBuilder::of_kind(NodeType::Subscript)
                .arg("obj")
                .arg_value(0)
                .build(),
        )
        .build();
    let graph = DependencyGraph::from_config(&workflow);
    let item = graph.node(graph.node_id("item").expect("item")).expect("node");
    assert_eq!(item.function.as_deref(), Some("getitem"));
}

/// Random DAGs where node `i` may only depend on nodes `< i`.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = DependencyGraph> {
    (1..=max_nodes).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            move |raw| {
                let nodes = raw.into_iter().enumerate().map(|(i, picks)| {
                    let deps: BTreeSet<NodeId> = if i == 0 {
                        BTreeSet::new()
                    } else {
                        picks.into_iter().map(|p| p % i).collect()
                    };
                    Node::function(i, format!("n{i}"), "identity").with_args(deps)
                });
                DependencyGraph::new(nodes, [])
            },
        )
    })
}

proptest! {
    #[test]
    fn levels_partition_the_graph(graph in dag_strategy(12)) {
        let levels: Vec<BTreeSet<NodeId>> = graph.topologically_sorted_levels().collect();

        let mut level_of: HashMap<NodeId, usize> = HashMap::new();
        for (k, level) in levels.iter().enumerate() {
            prop_assert!(!level.is_empty());
            for &id in level {
                prop_assert!(level_of.insert(id, k).is_none(), "node {} appears twice", id);
            }
        }
        prop_assert_eq!(level_of.len(), graph.len());

        for id in graph.node_ids() {
            for pred in graph.predecessors(id) {
                prop_assert!(level_of[&pred] < level_of[&id]);
            }
        }
    }
}
