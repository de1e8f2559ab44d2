// src/dag/node.rs

//! Nodes, edges and executor selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::NodeId;

/// What a node computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Calls a registered function.
    Function,
    /// Holds a constant; never submitted to an executor.
    Parameter,
    /// Reads a named attribute from the output of its producer.
    AttributeAccess,
    /// Indexes into the output of its producer.
    Subscript,
    /// Packs its inputs into a collection.
    GeneratedCollection,
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Function
    }
}

/// How an edge binds the producer's output into the consumer's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Positional,
    Keyword,
    /// Ordering-only dependency; the value is not passed to the call.
    Closure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    pub edge_name: String,
    pub param_type: ParamType,
    pub arg_index: Option<usize>,
}

/// Directed dependency `source -> target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub metadata: EdgeMetadata,
}

/// Executor short name plus its configuration blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSelection {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

impl ExecutorSelection {
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    /// Stable key used to check that nodes share an executor instance.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.config)
    }
}

/// A unit of computation in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    /// Name of the registered function (absent for parameters).
    pub function: Option<String>,
    /// Constant value of a parameter node.
    pub value: Option<Value>,
    /// Producer ids bound positionally, in argument order.
    pub args: Vec<NodeId>,
    /// Producer ids bound by keyword.
    pub kwargs: BTreeMap<String, NodeId>,
    pub executor: ExecutorSelection,
    /// Nodes sharing a task group id are packed into one submission.
    /// Defaults to the node's own id.
    pub task_group_id: NodeId,
}

impl Node {
    pub fn function(id: NodeId, name: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            node_type: NodeType::Function,
            function: Some(function.into()),
            value: None,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            executor: ExecutorSelection::named("local"),
            task_group_id: id,
        }
    }

    pub fn parameter(id: NodeId, name: impl Into<String>, value: Value) -> Self {
        Self {
            id,
            name: name.into(),
            node_type: NodeType::Parameter,
            function: None,
            value: Some(value),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            executor: ExecutorSelection::named("local"),
            task_group_id: id,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = NodeId>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, producer: NodeId) -> Self {
        self.kwargs.insert(key.into(), producer);
        self
    }

    pub fn with_executor(mut self, executor: ExecutorSelection) -> Self {
        self.executor = executor;
        self
    }

    pub fn in_task_group(mut self, task_group_id: NodeId) -> Self {
        self.task_group_id = task_group_id;
        self
    }

    pub fn is_parameter(&self) -> bool {
        self.node_type == NodeType::Parameter
    }
}
