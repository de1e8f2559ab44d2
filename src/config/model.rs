// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::node::NodeType;

/// Raw configuration as read from a workflow TOML file.
///
/// ```toml
/// [dispatcher]
/// debug_mode = false
/// repoll_interval_ms = 500
///
/// [default]
/// executor = "local"
///
/// [node.x]
/// kind = "parameter"
/// value = 1
///
/// [node.add]
/// function = "add"
/// args = ["x", { value = 2 }]
/// ```
///
/// All sections are optional and have reasonable defaults. Use
/// [`WorkflowFile`] (obtained through `TryFrom`) everywhere else.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    #[serde(default)]
    pub dispatcher: DispatcherSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All nodes from `[node.<name>]`, keyed by node name.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// Validated workflow configuration.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub dispatcher: DispatcherSection,
    pub default: DefaultSection,
    pub node: BTreeMap<String, NodeConfig>,
}

impl WorkflowFile {
    /// Only `config::validate` should call this.
    pub(crate) fn new_unchecked(
        dispatcher: DispatcherSection,
        default: DefaultSection,
        node: BTreeMap<String, NodeConfig>,
    ) -> Self {
        Self {
            dispatcher,
            default,
            node,
        }
    }
}

/// `[dispatcher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    /// Store full error chains (instead of messages) on failed nodes.
    #[serde(default)]
    pub debug_mode: bool,

    /// Capacity of the job event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Worker threads reserved for blocking `cancel` calls.
    #[serde(default = "default_cancel_workers")]
    pub cancel_workers: usize,

    /// If set, re-poll still-running task groups on this interval.
    /// If unset, each group is polled once and completion must be pushed.
    #[serde(default)]
    pub repoll_interval_ms: Option<u64>,
}

fn default_event_bus_capacity() -> usize {
    64
}

fn default_cancel_workers() -> usize {
    4
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            debug_mode: false,
            event_bus_capacity: default_event_bus_capacity(),
            cancel_workers: default_cancel_workers(),
            repoll_interval_ms: None,
        }
    }
}

impl DispatcherSection {
    pub fn repoll_interval(&self) -> Option<Duration> {
        self.repoll_interval_ms.map(Duration::from_millis)
    }
}

/// `[default]` section: executor used by nodes that do not name one.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    #[serde(default = "default_executor")]
    pub executor: String,

    #[serde(default)]
    pub executor_config: Option<toml::Value>,
}

fn default_executor() -> String {
    "local".to_string()
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            executor: default_executor(),
            executor_config: None,
        }
    }
}

/// A single argument binding: either a producer node name or a constant.
///
/// ```toml
/// args = ["x", { value = 3 }]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BindingConfig {
    Node(String),
    Constant { value: toml::Value },
}

/// `[node.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub kind: NodeType,

    /// Registered function name. Attribute, subscript and collection nodes
    /// fall back to the `getattr`, `getitem` and `collect` builtins.
    #[serde(default)]
    pub function: Option<String>,

    /// Constant value for `kind = "parameter"`.
    #[serde(default)]
    pub value: Option<toml::Value>,

    #[serde(default)]
    pub args: Vec<BindingConfig>,

    #[serde(default)]
    pub kwargs: BTreeMap<String, BindingConfig>,

    /// Ordering-only dependencies.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub executor: Option<String>,

    #[serde(default)]
    pub executor_config: Option<toml::Value>,

    /// Nodes sharing a label are submitted together as one task group.
    #[serde(default)]
    pub task_group: Option<String>,
}

impl NodeConfig {
    /// Names of every node this one depends on (data and ordering).
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .chain(self.kwargs.values())
            .filter_map(|b| match b {
                BindingConfig::Node(name) => Some(name.as_str()),
                BindingConfig::Constant { .. } => None,
            })
            .chain(self.after.iter().map(String::as_str))
    }
}
