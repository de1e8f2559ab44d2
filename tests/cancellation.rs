// tests/cancellation.rs

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use flowdispatch::dag::{DependencyGraph, ExecutorSelection, Node};
use flowdispatch::engine::{DispatchOutcome, Dispatcher};
use flowdispatch::errors::{DispatchError, Result};
use flowdispatch::exec::{CancelPool, ExecutorAdapter, JobHandle, PollStatus, TaskGroupMetadata};
use flowdispatch::store::MemoryStore;
use flowdispatch::types::{DispatchStatus, NodeStatus};
use flowdispatch_test_utils::fake_executor::{FakeBackend, FakeScript};
use flowdispatch_test_utils::{init_tracing, wait_until, with_timeout};

use common::{dispatcher, fake_dispatcher, job_of, output_of, settings, status_of};

/// `x = 3` feeding `sq` on `executor`, feeding a local `sq2`.
fn chain(executor: ExecutorSelection) -> DependencyGraph {
    DependencyGraph::new(
        [
            Node::parameter(0, "x", json!(3)),
            Node::function(1, "sq", "square")
                .with_args([0])
                .with_executor(executor),
            Node::function(2, "sq2", "square").with_args([1]),
        ],
        [],
    )
}

fn spawn_dispatch(
    dispatcher: &Arc<Dispatcher>,
    dispatch_id: &'static str,
    graph: DependencyGraph,
) -> tokio::task::JoinHandle<Result<DispatchOutcome>> {
    let dispatcher = Arc::clone(dispatcher);
    tokio::spawn(async move { dispatcher.dispatch(dispatch_id, graph).await })
}

async fn wait_for_handle(store: &MemoryStore, dispatch_id: &str) {
    wait_until(|| async { job_of(store, dispatch_id, 1).await.job_handle.is_some() }).await;
}

async fn finish(dispatcher: Arc<Dispatcher>) {
    match Arc::try_unwrap(dispatcher) {
        Ok(dispatcher) => dispatcher.shutdown().await,
        Err(_) => panic!("dispatcher still shared"),
    }
}

#[tokio::test]
async fn cancel_before_submission_skips_the_executor() {
    init_tracing();
    let backend = FakeBackend::default();
    let store = MemoryStore::new();
    let dispatcher = fake_dispatcher(&store, &backend, settings());
    let graph = chain(ExecutorSelection::named(FakeBackend::NAME));

    dispatcher.prepare("d-pre", &graph).await.unwrap();
    dispatcher.request_cancel("d-pre", &[1]).await.unwrap();
    let outcome = with_timeout(dispatcher.run("d-pre", Arc::new(graph)))
        .await
        .unwrap();

    assert_eq!(outcome.status, DispatchStatus::Cancelled);
    assert_eq!(status_of(&store, "d-pre", 0).await, NodeStatus::Completed);
    assert_eq!(status_of(&store, "d-pre", 1).await, NodeStatus::Cancelled);
    assert_eq!(status_of(&store, "d-pre", 2).await, NodeStatus::Cancelled);
    assert_eq!(backend.count("send"), 0);
    assert!(job_of(&store, "d-pre", 1).await.cancel_requested);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn cancel_reaches_a_running_group() {
    init_tracing();
    let backend = FakeBackend::new(FakeScript {
        poll_status: PollStatus::Running,
        ..FakeScript::default()
    });
    let store = MemoryStore::new();
    let dispatcher = Arc::new(fake_dispatcher(&store, &backend, settings()));

    let running = spawn_dispatch(
        &dispatcher,
        "d-running",
        chain(ExecutorSelection::named(FakeBackend::NAME)),
    );
    wait_for_handle(&store, "d-running").await;
    assert_eq!(status_of(&store, "d-running", 1).await, NodeStatus::Running);

    dispatcher.request_cancel("d-running", &[1]).await.unwrap();
    let outcome = with_timeout(running).await.unwrap().unwrap();

    assert_eq!(outcome.status, DispatchStatus::Cancelled);
    assert_eq!(status_of(&store, "d-running", 1).await, NodeStatus::Cancelled);
    assert_eq!(status_of(&store, "d-running", 2).await, NodeStatus::Cancelled);
    assert_eq!(backend.count("cancel"), 1);
    let job = job_of(&store, "d-running", 1).await;
    assert!(job.cancel_requested);
    assert!(job.cancel_successful);
    finish(dispatcher).await;
}

#[tokio::test]
async fn cancel_aborts_a_queued_batch_job() {
    init_tracing();
    let store = MemoryStore::new();
    let dispatcher = Arc::new(dispatcher(&store));

    let running = spawn_dispatch(
        &dispatcher,
        "d-batch",
        chain(ExecutorSelection::new("batch", json!({ "delay_ms": 200 }))),
    );
    wait_for_handle(&store, "d-batch").await;

    dispatcher.request_cancel("d-batch", &[1]).await.unwrap();
    let outcome = with_timeout(running).await.unwrap().unwrap();

    assert_eq!(outcome.status, DispatchStatus::Cancelled);
    assert_eq!(status_of(&store, "d-batch", 1).await, NodeStatus::Cancelled);
    assert_eq!(status_of(&store, "d-batch", 2).await, NodeStatus::Cancelled);
    assert!(job_of(&store, "d-batch", 1).await.cancel_successful);

    // The aborted job never pushes a late result.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(status_of(&store, "d-batch", 1).await, NodeStatus::Cancelled);
    finish(dispatcher).await;
}

#[tokio::test]
async fn declined_cancel_lets_the_group_finish() {
    init_tracing();
    let backend = FakeBackend::new(FakeScript {
        poll_status: PollStatus::Running,
        cancel_result: Ok(false),
        outputs: [(1, json!(9))].into(),
        ..FakeScript::default()
    });
    let store = MemoryStore::new();
    let dispatcher = Arc::new(fake_dispatcher(&store, &backend, settings()));

    let running = spawn_dispatch(
        &dispatcher,
        "d-declined",
        chain(ExecutorSelection::named(FakeBackend::NAME)),
    );
    wait_for_handle(&store, "d-declined").await;

    dispatcher.request_cancel("d-declined", &[1]).await.unwrap();
    wait_until(|| async { backend.count("cancel") == 1 }).await;
    assert_eq!(status_of(&store, "d-declined", 1).await, NodeStatus::Running);

    let meta = TaskGroupMetadata {
        dispatch_id: "d-declined".to_string(),
        task_group_id: 1,
        task_ids: vec![1],
    };
    dispatcher.events().mark_ready(meta).await.unwrap();
    let outcome = with_timeout(running).await.unwrap().unwrap();

    assert_eq!(outcome.status, DispatchStatus::Completed);
    assert_eq!(output_of(&store, "d-declined", 2).await, json!(81));
    assert!(!job_of(&store, "d-declined", 1).await.cancel_successful);
    finish(dispatcher).await;
}

#[tokio::test]
async fn cancelling_a_finished_node_is_a_no_op() {
    init_tracing();
    let store = MemoryStore::new();
    let dispatcher = dispatcher(&store);

    let outcome = with_timeout(dispatcher.dispatch("d-done", chain(ExecutorSelection::named("local"))))
        .await
        .unwrap();
    assert_eq!(outcome.status, DispatchStatus::Completed);

    dispatcher.request_cancel("d-done", &[1, 2]).await.unwrap();
    let job = job_of(&store, "d-done", 1).await;
    assert!(!job.cancel_requested);
    assert_eq!(status_of(&store, "d-done", 2).await, NodeStatus::Completed);
    dispatcher.shutdown().await;
}

/// Records the name of the thread each `cancel` runs on.
#[derive(Debug, Default)]
struct ThreadRecorder {
    threads: Mutex<Vec<String>>,
}

impl ExecutorAdapter for ThreadRecorder {
    fn short_name(&self) -> &str {
        "recorder"
    }

    fn cancel(&self, _handle: &JobHandle) -> Result<bool> {
        let name = std::thread::current().name().unwrap_or_default().to_string();
        self.threads.lock().unwrap().push(name);
        Ok(true)
    }
}

#[tokio::test]
async fn cancel_pool_runs_on_dedicated_threads() {
    let pool = CancelPool::new(2, 4).unwrap();
    let recorder = Arc::new(ThreadRecorder::default());

    for i in 0..3 {
        let cancelled = pool
            .cancel(recorder.clone(), JobHandle(json!({ "job": i })))
            .await
            .unwrap();
        assert!(cancelled);
    }

    let threads = recorder.threads.lock().unwrap().clone();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|t| t.starts_with("flowdispatch-cancel-")));

    pool.shutdown().await;
    assert!(matches!(
        pool.cancel(recorder, JobHandle(json!(null))).await,
        Err(DispatchError::ChannelClosed(_))
    ));
}
