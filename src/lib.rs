// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::dag::DependencyGraph;
use crate::engine::{DispatchOutcome, Dispatcher};
use crate::exec::{ExecutorRegistry, FunctionRegistry};
use crate::store::{AssetTransfer, MemoryStore};
use crate::types::{AssetKind, DispatchStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow loading and validation
/// - the dependency graph
/// - the in-memory stores and builtin executors
/// - the dispatcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let workflow = load_and_validate(&args.workflow)?;
    let graph = DependencyGraph::from_config(&workflow);

    if args.dry_run {
        print_dry_run(&graph);
        return Ok(());
    }

    let store = MemoryStore::new();
    let functions = Arc::new(FunctionRegistry::with_builtins());
    let registry = ExecutorRegistry::with_builtins(functions);
    let dispatcher = Dispatcher::in_memory(&workflow.dispatcher, store.clone(), registry)?;

    let dispatch_id = args
        .dispatch_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(%dispatch_id, workflow = %args.workflow, nodes = graph.len(), "starting dispatch");

    // Ctrl-C → graceful shutdown.
    let ctrl_c = {
        let ctx = Arc::clone(dispatcher.context());
        let dispatch_id = dispatch_id.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            ctx.request_shutdown(&dispatch_id).await;
        })
    };

    let outcome = dispatcher.dispatch(dispatch_id, graph.clone()).await;
    ctrl_c.abort();
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            dispatcher.shutdown().await;
            return Err(err.into());
        }
    };

    print_outcome(&graph, &store, &outcome).await;
    dispatcher.shutdown().await;

    if outcome.status != DispatchStatus::Completed {
        bail!("dispatch {} finished {}", outcome.dispatch_id, outcome.status);
    }
    Ok(())
}

async fn print_outcome(graph: &DependencyGraph, store: &MemoryStore, outcome: &DispatchOutcome) {
    println!("dispatch {}", outcome.dispatch_id);
    for (&node_id, status) in &outcome.node_statuses {
        let name = graph.node(node_id).map(|n| n.name.as_str()).unwrap_or("?");
        match store
            .load(&outcome.dispatch_id, node_id, AssetKind::Output)
            .await
        {
            Ok(output) => println!("  [{node_id}] {name}: {status} = {output}"),
            Err(_) => println!("  [{node_id}] {name}: {status}"),
        }
    }
    println!("status: {}", outcome.status);
}

/// Dry-run output: print the topological levels with node names.
fn print_dry_run(graph: &DependencyGraph) {
    println!("flowdispatch dry-run");
    println!("nodes ({}):", graph.len());

    for (index, level) in graph.topologically_sorted_levels().enumerate() {
        println!("  level {index}:");
        for node_id in level {
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            let function = node.function.as_deref().unwrap_or("-");
            println!(
                "    - [{node_id}] {} ({:?}, fn: {function}, executor: {}, group: {})",
                node.name, node.node_type, node.executor.name, node.task_group_id
            );
        }
    }

    debug!("dry-run complete (no execution)");
}
