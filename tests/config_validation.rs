// tests/config_validation.rs

use std::io::Write;

use serde_json::json;
use tempfile::NamedTempFile;

use flowdispatch::config::{load_and_validate, parse_str};
use flowdispatch::config::model::WorkflowFile;
use flowdispatch::dag::{DependencyGraph, NodeType};
use flowdispatch::errors::DispatchError;

fn workflow_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str) -> String {
    let file = workflow_file(contents);
    match load_and_validate(file.path()) {
        Err(DispatchError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn loads_a_complete_workflow() {
    let file = workflow_file(
        r#"
[dispatcher]
debug_mode = true
repoll_interval_ms = 25

[default]
executor = "batch"
executor_config = { delay_ms = 5 }

[node.x]
kind = "parameter"
value = 3

[node.sq]
function = "square"
args = ["x"]
executor = "local"

[node.mul]
function = "multiply"
args = ["x", "sq"]
kwargs = { factor = { value = 2 } }
"#,
    );

    let workflow = load_and_validate(file.path()).expect("valid workflow");
    assert!(workflow.dispatcher.debug_mode);
    assert_eq!(workflow.dispatcher.repoll_interval_ms, Some(25));
    assert_eq!(workflow.node.len(), 3);

    let graph = DependencyGraph::from_config(&workflow);
    assert_eq!(graph.len(), 4, "the kwarg constant becomes a parameter node");

    let sq = graph.node(graph.node_id("sq").unwrap()).unwrap();
    assert_eq!(sq.executor.name, "local");

    let mul = graph.node(graph.node_id("mul").unwrap()).unwrap();
    assert_eq!(mul.executor.name, "batch");
    assert_eq!(mul.executor.config, json!({ "delay_ms": 5 }));
    let factor = graph.node(mul.kwargs["factor"]).unwrap();
    assert_eq!(factor.node_type, NodeType::Parameter);
    assert_eq!(factor.value, Some(json!(2)));
}

#[test]
fn dependency_cycle_returns_structured_error() {
    let file = workflow_file(
        r#"
[node.a]
function = "identity"
args = ["b"]

[node.b]
function = "identity"
args = ["a"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(DispatchError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('a') || msg.contains('b'));
        }
        Err(e) => panic!("Expected DagCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_dependency_returns_config_error() {
    let msg = expect_config_error(
        r#"
[node.a]
function = "identity"
after = ["missing"]
"#,
    );
    assert!(msg.contains("unknown dependency"));
    assert!(msg.contains("missing"));
}

#[test]
fn empty_workflow_is_rejected() {
    let msg = expect_config_error("[dispatcher]\ndebug_mode = false\n");
    assert!(msg.contains("at least one"));
}

#[test]
fn parameter_needs_a_value() {
    let msg = expect_config_error(
        r#"
[node.p]
kind = "parameter"
"#,
    );
    assert!(msg.contains("must set `value`"));
}

#[test]
fn function_node_needs_a_function() {
    let msg = expect_config_error(
        r#"
[node.f]
args = [{ value = 1 }]
"#,
    );
    assert!(msg.contains("must name a `function`"));
}

#[test]
fn zero_cancel_workers_are_rejected() {
    let msg = expect_config_error(
        r#"
[dispatcher]
cancel_workers = 0

[node.f]
function = "identity"
"#,
    );
    assert!(msg.contains("cancel_workers"));
}

#[test]
fn task_group_members_must_share_an_executor() {
    let msg = expect_config_error(
        r#"
[node.p]
function = "identity"
executor = "batch"
task_group = "g"

[node.q]
function = "identity"
executor = "local"
task_group = "g"
"#,
    );
    assert!(msg.contains("different executors"));
}

#[test]
fn task_group_members_must_be_independent() {
    let msg = expect_config_error(
        r#"
[node.p]
function = "identity"
task_group = "g"

[node.q]
function = "identity"
args = ["p"]
task_group = "g"
"#,
    );
    assert!(msg.contains("depend on each other"));
}

#[test]
fn task_groups_cannot_wait_on_each_other() {
    // g = {a, d}, h = {b, c}: b needs a and d needs c.
    let msg = expect_config_error(
        r#"
[node.a]
function = "identity"
task_group = "g"

[node.d]
function = "identity"
args = ["c"]
task_group = "g"

[node.b]
function = "identity"
args = ["a"]
task_group = "h"

[node.c]
function = "identity"
task_group = "h"
"#,
    );
    assert!(msg.contains("cycle"));
}

#[test]
fn parse_str_does_not_validate() {
    let raw = parse_str(
        r#"
[node.a]
function = "identity"
args = ["nowhere"]
"#,
    )
    .expect("syntactically valid");
    assert!(WorkflowFile::try_from(raw).is_err());
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = workflow_file("[node.a\nfunction = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(DispatchError::TomlError(_))
    ));
}
