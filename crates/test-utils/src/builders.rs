#![allow(dead_code)]

use std::collections::BTreeMap;

use flowdispatch::config::{
    BindingConfig, DefaultSection, DispatcherSection, NodeConfig, RawWorkflowFile, WorkflowFile,
};
use flowdispatch::dag::NodeType;
use flowdispatch::errors::Result;

/// Builder for `WorkflowFile` to simplify test setup.
pub struct WorkflowFileBuilder {
    workflow: RawWorkflowFile,
}

impl WorkflowFileBuilder {
    pub fn new() -> Self {
        Self {
            workflow: RawWorkflowFile {
                dispatcher: DispatcherSection::default(),
                default: DefaultSection::default(),
                node: BTreeMap::new(),
            },
        }
    }

    pub fn with_node(mut self, name: &str, node: NodeConfig) -> Self {
        self.workflow.node.insert(name.to_string(), node);
        self
    }

    pub fn with_default_executor(mut self, name: &str) -> Self {
        self.workflow.default.executor = name.to_string();
        self
    }

    pub fn with_default_executor_config(mut self, config: toml::Value) -> Self {
        self.workflow.default.executor_config = Some(config);
        self
    }

    pub fn with_repoll_interval_ms(mut self, ms: u64) -> Self {
        self.workflow.dispatcher.repoll_interval_ms = Some(ms);
        self
    }

    pub fn with_debug_mode(mut self, val: bool) -> Self {
        self.workflow.dispatcher.debug_mode = val;
        self
    }

    pub fn raw(self) -> RawWorkflowFile {
        self.workflow
    }

    pub fn try_build(self) -> Result<WorkflowFile> {
        WorkflowFile::try_from(self.workflow)
    }

    pub fn build(self) -> WorkflowFile {
        self.try_build()
            .expect("Failed to build valid workflow from builder")
    }
}

impl Default for WorkflowFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    /// Node calling the registered function `name`.
    pub fn function(name: &str) -> Self {
        Self {
            node: NodeConfig {
                function: Some(name.to_string()),
                ..NodeConfig::default()
            },
        }
    }

    /// Parameter node holding a constant.
    pub fn parameter(value: impl Into<toml::Value>) -> Self {
        Self {
            node: NodeConfig {
                kind: NodeType::Parameter,
                value: Some(value.into()),
                ..NodeConfig::default()
            },
        }
    }

    /// Node of a builtin kind (`getattr`, `getitem`, `collect`).
    pub fn of_kind(kind: NodeType) -> Self {
        Self {
            node: NodeConfig {
                kind,
                ..NodeConfig::default()
            },
        }
    }

    pub fn arg(mut self, producer: &str) -> Self {
        self.node.args.push(BindingConfig::Node(producer.to_string()));
        self
    }

    pub fn arg_value(mut self, value: impl Into<toml::Value>) -> Self {
        self.node.args.push(BindingConfig::Constant {
            value: value.into(),
        });
        self
    }

    pub fn kwarg(mut self, key: &str, producer: &str) -> Self {
        self.node
            .kwargs
            .insert(key.to_string(), BindingConfig::Node(producer.to_string()));
        self
    }

    pub fn kwarg_value(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.node.kwargs.insert(
            key.to_string(),
            BindingConfig::Constant {
                value: value.into(),
            },
        );
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.node.after.push(dep.to_string());
        self
    }

    pub fn executor(mut self, name: &str) -> Self {
        self.node.executor = Some(name.to_string());
        self
    }

    pub fn executor_config(mut self, config: toml::Value) -> Self {
        self.node.executor_config = Some(config);
        self
    }

    pub fn task_group(mut self, label: &str) -> Self {
        self.node.task_group = Some(label.to_string());
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}
