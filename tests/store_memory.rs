// tests/store_memory.rs

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;

use flowdispatch::dag::{ExecutorSelection, Node};
use flowdispatch::errors::DispatchError;
use flowdispatch::store::{
    AssetTransfer, JobStore, MemoryStore, NodeAttribute, NodeResultStore, generate_node_result,
};
use flowdispatch::types::{AssetKind, NodeStatus};

const DISPATCH: &str = "d-store";

async fn store_with_node() -> MemoryStore {
    let store = MemoryStore::new();
    let node = Node::function(7, "sq", "square")
        .with_executor(ExecutorSelection::new("batch", json!({ "delay_ms": 1 })))
        .in_task_group(5);
    store.register_node(DISPATCH, &node).await.unwrap();
    store.create_job(DISPATCH, 7).await.unwrap();
    store
}

#[tokio::test]
async fn registered_node_exposes_attributes() {
    let store = store_with_node().await;

    let get = |attr| store.get_attribute(DISPATCH, 7, attr);
    assert_eq!(get(NodeAttribute::Name).await.unwrap(), json!("sq"));
    assert_eq!(get(NodeAttribute::Function).await.unwrap(), json!("square"));
    assert_eq!(get(NodeAttribute::Executor).await.unwrap(), json!("batch"));
    assert_eq!(
        get(NodeAttribute::ExecutorData).await.unwrap(),
        json!({ "delay_ms": 1 })
    );
    assert_eq!(get(NodeAttribute::TaskGroupId).await.unwrap(), json!(5));
    assert_eq!(get(NodeAttribute::Status).await.unwrap(), json!("NEW"));
    assert_eq!(get(NodeAttribute::OutputUri).await.unwrap(), json!(null));
}

#[tokio::test]
async fn statuses_only_move_forward() {
    let store = store_with_node().await;

    let running = generate_node_result(7, NodeStatus::Running).with_start_time(Utc::now());
    assert!(store.update_node_result(DISPATCH, running).await.unwrap());

    let completed = generate_node_result(7, NodeStatus::Completed)
        .with_end_time(Utc::now())
        .with_output_uri(Some("local://x".to_string()));
    assert!(store.update_node_result(DISPATCH, completed).await.unwrap());

    let late_failure = generate_node_result(7, NodeStatus::Failed).with_error("too late");
    assert!(!store.update_node_result(DISPATCH, late_failure).await.unwrap());

    let result = store.get_node_result(DISPATCH, 7).await.unwrap();
    assert_eq!(result.status, NodeStatus::Completed);
    assert_eq!(result.error, None);
    assert_eq!(result.output_uri.as_deref(), Some("local://x"));
    assert!(result.start_time.is_some(), "partial updates keep earlier fields");
}

#[tokio::test]
async fn running_cannot_go_back_to_new() {
    let store = store_with_node().await;
    store
        .update_node_result(DISPATCH, generate_node_result(7, NodeStatus::Running))
        .await
        .unwrap();
    let applied = store
        .update_node_result(DISPATCH, generate_node_result(7, NodeStatus::New))
        .await
        .unwrap();
    assert!(!applied);
}

#[tokio::test]
async fn job_records_track_handles_and_cancellation() {
    let store = store_with_node().await;

    store.set_job_handle(DISPATCH, 7, "{\"job\":1}".to_string()).await.unwrap();
    store.set_cancel_requested(DISPATCH, 7).await.unwrap();
    store.set_cancel_successful(DISPATCH, 7, true).await.unwrap();
    store.put_job_status(DISPATCH, 7, NodeStatus::Cancelled).await.unwrap();

    let record = store.get_jobs_metadata(DISPATCH, &[7]).await.unwrap().remove(0);
    assert_eq!(record.job_handle.as_deref(), Some("{\"job\":1}"));
    assert!(record.cancel_requested);
    assert!(record.cancel_successful);
    assert_eq!(record.status, NodeStatus::Cancelled);
}

#[tokio::test]
async fn missing_records_are_errors() {
    let store = MemoryStore::new();
    assert!(matches!(
        store.get_node_result(DISPATCH, 1).await,
        Err(DispatchError::NodeNotFound { node_id: 1, .. })
    ));
    assert!(matches!(
        store.get_jobs_metadata(DISPATCH, &[1]).await,
        Err(DispatchError::JobNotFound { node_id: 1, .. })
    ));
    assert!(matches!(
        store.load(DISPATCH, 1, AssetKind::Output).await,
        Err(DispatchError::AssetNotFound(_))
    ));
}

#[tokio::test]
async fn assets_move_between_local_and_remote_uris() {
    let store = MemoryStore::new();

    let local = store
        .stage(DISPATCH, 3, AssetKind::Function, json!("square"))
        .await
        .unwrap();
    assert_eq!(local, "local://d-store/node_3/function");

    let uploads = BTreeMap::from([(3, "remote://g/function-3".to_string())]);
    store
        .upload_asset_for_nodes(DISPATCH, AssetKind::Function, &uploads)
        .await
        .unwrap();
    assert_eq!(store.read_uri("remote://g/function-3").await.unwrap(), json!("square"));

    store.write_uri("remote://g/node_4/output", json!(16)).await.unwrap();
    let downloads = BTreeMap::from([(4, "remote://g/node_4/output".to_string())]);
    store
        .download_asset_for_nodes(DISPATCH, AssetKind::Output, &downloads)
        .await
        .unwrap();
    assert_eq!(store.load(DISPATCH, 4, AssetKind::Output).await.unwrap(), json!(16));

    let missing = BTreeMap::from([(9, "remote://nowhere".to_string())]);
    assert!(
        store
            .upload_asset_for_nodes(DISPATCH, AssetKind::Deps, &missing)
            .await
            .is_err()
    );
}
