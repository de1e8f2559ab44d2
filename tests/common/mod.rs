#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use flowdispatch::config::DispatcherSection;
use flowdispatch::engine::Dispatcher;
use flowdispatch::exec::{ExecutorRegistry, FunctionRegistry};
use flowdispatch::store::{AssetTransfer, JobRecord, JobStore, MemoryStore, NodeResultStore};
use flowdispatch::types::{AssetKind, NodeId, NodeStatus};
use flowdispatch_test_utils::fake_executor::FakeBackend;

pub fn settings() -> DispatcherSection {
    DispatcherSection {
        cancel_workers: 2,
        ..DispatcherSection::default()
    }
}

pub fn builtin_registry() -> ExecutorRegistry {
    ExecutorRegistry::with_builtins(Arc::new(FunctionRegistry::with_builtins()))
}

/// Dispatcher with the builtin executors over `store`.
pub fn dispatcher(store: &MemoryStore) -> Dispatcher {
    Dispatcher::in_memory(&settings(), store.clone(), builtin_registry())
        .expect("dispatcher should start")
}

/// Dispatcher with the builtin executors plus `fake` backed by `backend`.
pub fn fake_dispatcher(
    store: &MemoryStore,
    backend: &FakeBackend,
    settings: DispatcherSection,
) -> Dispatcher {
    let mut registry = builtin_registry();
    backend.register(&mut registry);
    Dispatcher::in_memory(&settings, store.clone(), registry).expect("dispatcher should start")
}

pub async fn status_of(store: &MemoryStore, dispatch_id: &str, node_id: NodeId) -> NodeStatus {
    store
        .get_node_result(dispatch_id, node_id)
        .await
        .expect("node result should exist")
        .status
}

pub async fn error_of(store: &MemoryStore, dispatch_id: &str, node_id: NodeId) -> Option<String> {
    store
        .get_node_result(dispatch_id, node_id)
        .await
        .expect("node result should exist")
        .error
}

pub async fn output_of(store: &MemoryStore, dispatch_id: &str, node_id: NodeId) -> Value {
    store
        .load(dispatch_id, node_id, AssetKind::Output)
        .await
        .expect("node output should be staged")
}

pub async fn job_of(store: &MemoryStore, dispatch_id: &str, node_id: NodeId) -> JobRecord {
    store
        .get_jobs_metadata(dispatch_id, &[node_id])
        .await
        .expect("job record should exist")
        .remove(0)
}
