// src/config/validate.rs

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{NodeConfig, RawWorkflowFile, WorkflowFile};
use crate::dag::node::NodeType;
use crate::errors::{DispatchError, Result};

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = DispatchError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(WorkflowFile::new_unchecked(raw.dispatcher, raw.default, raw.node))
    }
}

fn validate_raw_config(cfg: &RawWorkflowFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_dispatcher_section(cfg)?;
    validate_node_kinds(cfg)?;
    validate_dependencies(cfg)?;
    let graph = validate_dag(cfg)?;
    validate_task_groups(cfg, &graph)?;
    validate_group_order(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(DispatchError::ConfigError(
            "workflow must contain at least one [node.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_dispatcher_section(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.dispatcher.event_bus_capacity == 0 {
        return Err(DispatchError::ConfigError(
            "[dispatcher].event_bus_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.dispatcher.cancel_workers == 0 {
        return Err(DispatchError::ConfigError(
            "[dispatcher].cancel_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.dispatcher.repoll_interval_ms == Some(0) {
        return Err(DispatchError::ConfigError(
            "[dispatcher].repoll_interval_ms must be >= 1 when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_node_kinds(cfg: &RawWorkflowFile) -> Result<()> {
    for (name, node) in cfg.node.iter() {
        match node.kind {
            NodeType::Parameter => {
                if node.value.is_none() {
                    return Err(DispatchError::ConfigError(format!(
                        "parameter node '{name}' must set `value`"
                    )));
                }
                if !node.args.is_empty() || !node.kwargs.is_empty() || node.function.is_some() {
                    return Err(DispatchError::ConfigError(format!(
                        "parameter node '{name}' cannot take `function`, `args` or `kwargs`"
                    )));
                }
            }
            NodeType::Function => {
                if node.function.is_none() {
                    return Err(DispatchError::ConfigError(format!(
                        "node '{name}' must name a `function`"
                    )));
                }
            }
            NodeType::AttributeAccess | NodeType::Subscript | NodeType::GeneratedCollection => {}
        }
    }
    Ok(())
}

fn validate_dependencies(cfg: &RawWorkflowFile) -> Result<()> {
    for (name, node) in cfg.node.iter() {
        for dep in node.dependency_names() {
            if !cfg.node.contains_key(dep) {
                return Err(DispatchError::ConfigError(format!(
                    "node '{name}' has unknown dependency '{dep}'"
                )));
            }
            if dep == name {
                return Err(DispatchError::ConfigError(format!(
                    "node '{name}' cannot depend on itself"
                )));
            }
        }
    }
    Ok(())
}

/// Build the name graph (edge direction: producer -> consumer) and reject cycles.
fn validate_dag(cfg: &RawWorkflowFile) -> Result<DiGraphMap<&str, ()>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.node.keys() {
        graph.add_node(name.as_str());
    }

    for (name, node) in cfg.node.iter() {
        for dep in node.dependency_names() {
            graph.add_edge(dep, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(graph),
        Err(cycle) => Err(DispatchError::DagCycle(format!(
            "cycle detected in workflow graph involving node '{}'",
            cycle.node_id()
        ))),
    }
}

/// Members of a task group must share one executor and be mutually independent.
fn validate_task_groups(cfg: &RawWorkflowFile, graph: &DiGraphMap<&str, ()>) -> Result<()> {
    let mut groups: BTreeMap<&str, Vec<(&str, &NodeConfig)>> = BTreeMap::new();
    for (name, node) in cfg.node.iter() {
        if let Some(label) = node.task_group.as_deref() {
            groups.entry(label).or_default().push((name.as_str(), node));
        }
    }

    for (label, members) in groups.iter() {
        let (first_name, first) = members[0];
        for &(name, node) in members.iter().skip(1) {
            if node.executor != first.executor || node.executor_config != first.executor_config {
                return Err(DispatchError::ConfigError(format!(
                    "task group '{label}': nodes '{first_name}' and '{name}' use different executors"
                )));
            }
        }

        for (i, &(a, _)) in members.iter().enumerate() {
            for &(b, _) in members.iter().skip(i + 1) {
                if has_path_connecting(graph, a, b, None) || has_path_connecting(graph, b, a, None) {
                    return Err(DispatchError::ConfigError(format!(
                        "task group '{label}': nodes '{a}' and '{b}' depend on each other"
                    )));
                }
            }
        }

        if members.iter().any(|(_, n)| n.kind == NodeType::Parameter) {
            return Err(DispatchError::ConfigError(format!(
                "task group '{label}' cannot contain parameter nodes"
            )));
        }
    }
    Ok(())
}

/// Groups are submitted atomically, so the graph with every group contracted
/// to a single vertex must stay acyclic.
fn validate_group_order(cfg: &RawWorkflowFile) -> Result<()> {
    let mut labels: HashMap<&str, usize> = HashMap::new();
    let mut unit_of: HashMap<&str, usize> = HashMap::new();
    for (i, (name, node)) in cfg.node.iter().enumerate() {
        let unit = match node.task_group.as_deref() {
            Some(label) => {
                let next = cfg.node.len() + labels.len();
                *labels.entry(label).or_insert(next)
            }
            None => i,
        };
        unit_of.insert(name.as_str(), unit);
    }

    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for &unit in unit_of.values() {
        graph.add_node(unit);
    }
    for (name, node) in cfg.node.iter() {
        let to = unit_of[name.as_str()];
        for dep in node.dependency_names() {
            let from = unit_of[dep];
            if from != to {
                graph.add_edge(from, to, ());
            }
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|_| {
        DispatchError::ConfigError(
            "task groups depend on each other in a cycle; no group can be submitted first"
                .to_string(),
        )
    })
}
