// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::config::model::{BindingConfig, WorkflowFile};
use crate::dag::node::{Edge, EdgeMetadata, ExecutorSelection, Node, NodeType, ParamType};
use crate::types::{NodeId, NodeStatus};

/// Immediate neighbours of a node.
#[derive(Debug, Clone, Default)]
struct Adjacency {
    preds: BTreeSet<NodeId>,
    succs: BTreeSet<NodeId>,
}

/// In-memory workflow DAG keyed by node id.
///
/// Acyclicity is checked in `config::validate` (or guaranteed by whoever
/// builds the graph programmatically); nothing here re-validates it.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
    adjacency: HashMap<NodeId, Adjacency>,
}

impl DependencyGraph {
    /// Build a graph from nodes plus ordering-only (`after`) dependencies.
    ///
    /// Data edges are derived from each node's positional and keyword
    /// bindings; `closure_deps` holds `(source, target)` pairs.
    pub fn new(
        nodes: impl IntoIterator<Item = Node>,
        closure_deps: impl IntoIterator<Item = (NodeId, NodeId)>,
    ) -> Self {
        let nodes: BTreeMap<NodeId, Node> = nodes.into_iter().map(|n| (n.id, n)).collect();
        let mut edges = Vec::new();

        for node in nodes.values() {
            for (index, &source) in node.args.iter().enumerate() {
                edges.push(Edge {
                    source,
                    target: node.id,
                    metadata: EdgeMetadata {
                        edge_name: format!("arg[{index}]"),
                        param_type: ParamType::Positional,
                        arg_index: Some(index),
                    },
                });
            }
            for (key, &source) in node.kwargs.iter() {
                edges.push(Edge {
                    source,
                    target: node.id,
                    metadata: EdgeMetadata {
                        edge_name: key.clone(),
                        param_type: ParamType::Keyword,
                        arg_index: None,
                    },
                });
            }
        }

        for (source, target) in closure_deps {
            edges.push(Edge {
                source,
                target,
                metadata: EdgeMetadata {
                    edge_name: "after".to_string(),
                    param_type: ParamType::Closure,
                    arg_index: None,
                },
            });
        }

        let mut adjacency: HashMap<NodeId, Adjacency> =
            nodes.keys().map(|&id| (id, Adjacency::default())).collect();
        for edge in &edges {
            if let Some(target) = adjacency.get_mut(&edge.target) {
                target.preds.insert(edge.source);
            }
            if let Some(source) = adjacency.get_mut(&edge.source) {
                source.succs.insert(edge.target);
            }
        }

        Self {
            nodes,
            edges,
            adjacency,
        }
    }

    /// Build a graph from a validated [`WorkflowFile`].
    ///
    /// Named nodes get ids in name order; constant bindings are lifted into
    /// synthesized parameter nodes appended after them, so that every binding
    /// refers to a producer node.
    pub fn from_config(cfg: &WorkflowFile) -> Self {
        let ids: HashMap<&str, NodeId> = cfg
            .node
            .keys()
            .enumerate()
            .map(|(id, name)| (name.as_str(), id))
            .collect();

        // Representative (lowest id) per task group label.
        let mut group_ids: HashMap<&str, NodeId> = HashMap::new();
        for (name, nc) in cfg.node.iter() {
            if let Some(label) = nc.task_group.as_deref() {
                let id = ids[name.as_str()];
                group_ids
                    .entry(label)
                    .and_modify(|g| *g = (*g).min(id))
                    .or_insert(id);
            }
        }

        let default_executor = ExecutorSelection::new(
            cfg.default.executor.clone(),
            cfg.default
                .executor_config
                .as_ref()
                .map(toml_to_json)
                .unwrap_or(Value::Null),
        );

        let mut next_id = cfg.node.len();
        let mut lifted: Vec<Node> = Vec::new();
        let mut lift = |owner: &str, slot: String, binding: &BindingConfig| -> NodeId {
            match binding {
                BindingConfig::Node(producer) => ids[producer.as_str()],
                BindingConfig::Constant { value } => {
                    let id = next_id;
                    next_id += 1;
                    lifted.push(
                        Node::parameter(id, format!("{owner}.{slot}"), toml_to_json(value))
                            .with_executor(default_executor.clone()),
                    );
                    id
                }
            }
        };

        let mut nodes = Vec::with_capacity(cfg.node.len());
        let mut closure_deps = Vec::new();

        for (name, nc) in cfg.node.iter() {
            let id = ids[name.as_str()];

            let args = nc
                .args
                .iter()
                .enumerate()
                .map(|(i, b)| lift(name.as_str(), format!("args[{i}]"), b))
                .collect::<Vec<_>>();
            let kwargs = nc
                .kwargs
                .iter()
                .map(|(k, b)| (k.clone(), lift(name.as_str(), format!("kwargs[{k}]"), b)))
                .collect::<BTreeMap<_, _>>();

            let executor = match (&nc.executor, &nc.executor_config) {
                (None, None) => default_executor.clone(),
                (name_override, config_override) => ExecutorSelection::new(
                    name_override
                        .clone()
                        .unwrap_or_else(|| default_executor.name.clone()),
                    config_override
                        .as_ref()
                        .map(toml_to_json)
                        .unwrap_or_else(|| default_executor.config.clone()),
                ),
            };

            let task_group_id = nc
                .task_group
                .as_deref()
                .and_then(|label| group_ids.get(label).copied())
                .unwrap_or(id);

            nodes.push(Node {
                id,
                name: name.clone(),
                node_type: nc.kind,
                function: nc
                    .function
                    .clone()
                    .or_else(|| default_function_for(nc.kind).map(str::to_string)),
                value: nc.value.as_ref().map(toml_to_json),
                args,
                kwargs,
                executor,
                task_group_id,
            });

            for dep in nc.after.iter() {
                closure_deps.push((ids[dep.as_str()], id));
            }
        }

        nodes.extend(lifted);
        Self::new(nodes, closure_deps)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Look a node up by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes.values().find(|n| n.name == name).map(|n| n.id)
    }

    /// Immediate producers of `id`.
    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flat_map(|a| a.preds.iter().copied())
    }

    /// Immediate consumers of `id`.
    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flat_map(|a| a.succs.iter().copied())
    }

    /// Every node reachable from `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = self.successors(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.successors(next));
            }
        }
        seen
    }

    /// Members of every task group, keyed by task group id.
    pub fn task_groups(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        let mut groups: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in self.nodes.values() {
            groups.entry(node.task_group_id).or_default().push(node.id);
        }
        groups
    }

    /// Producers outside `members` whose outputs the members consume.
    pub fn known_inputs(&self, members: &[NodeId]) -> Vec<NodeId> {
        let inside: BTreeSet<NodeId> = members.iter().copied().collect();
        members
            .iter()
            .flat_map(|&m| self.predecessors(m))
            .filter(|p| !inside.contains(p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// True iff the node is `New` and every predecessor is `Completed`.
    pub fn is_runnable(&self, id: NodeId, status_of: impl Fn(NodeId) -> NodeStatus) -> bool {
        if !self.nodes.contains_key(&id) || status_of(id) != NodeStatus::New {
            return false;
        }
        self.predecessors(id)
            .all(|p| status_of(p) == NodeStatus::Completed)
    }

    /// True if any predecessor ended FAILED/CANCELLED, i.e. the node can never run.
    pub fn has_failed_predecessor(
        &self,
        id: NodeId,
        status_of: impl Fn(NodeId) -> NodeStatus,
    ) -> bool {
        self.predecessors(id).any(|p| status_of(p).is_failure())
    }

    /// Lazy decomposition into levels: level *k* holds every node whose
    /// predecessors all sit in levels `< k`.
    ///
    /// Each call starts a fresh traversal.
    pub fn topologically_sorted_levels(&self) -> Levels<'_> {
        let in_degree: HashMap<NodeId, usize> = self
            .adjacency
            .iter()
            .map(|(&id, adj)| (id, adj.preds.len()))
            .collect();
        let frontier = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();

        Levels {
            graph: self,
            in_degree,
            frontier,
        }
    }
}

/// Iterator returned by [`DependencyGraph::topologically_sorted_levels`].
#[derive(Debug)]
pub struct Levels<'a> {
    graph: &'a DependencyGraph,
    in_degree: HashMap<NodeId, usize>,
    frontier: BTreeSet<NodeId>,
}

impl Iterator for Levels<'_> {
    type Item = BTreeSet<NodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frontier.is_empty() {
            return None;
        }

        let level = std::mem::take(&mut self.frontier);
        for &id in &level {
            for succ in self.graph.successors(id) {
                if let Some(d) = self.in_degree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        self.frontier.insert(succ);
                    }
                }
            }
        }
        Some(level)
    }
}

fn default_function_for(kind: NodeType) -> Option<&'static str> {
    match kind {
        NodeType::AttributeAccess => Some("getattr"),
        NodeType::Subscript => Some("getitem"),
        NodeType::GeneratedCollection => Some("collect"),
        NodeType::Function | NodeType::Parameter => None,
    }
}

/// Convert a TOML value into the JSON value model used at runtime.
pub fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => Value::from(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}
