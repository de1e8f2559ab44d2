// src/errors.rs

//! Crate-wide error type, result alias and the single error-to-detail mapping
//! used when a failure is converted into a terminal node status.

use thiserror::Error;

use crate::types::{DispatchId, NodeId};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cycle detected in workflow graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("Executor '{executor}' does not support {operation}")]
    Unsupported {
        executor: String,
        operation: &'static str,
    },

    #[error("Task packing not supported by executor '{executor}' ({tasks} tasks in group)")]
    TaskPackingUnsupported { executor: String, tasks: usize },

    #[error("Node {node_id} not found in dispatch {dispatch_id}")]
    NodeNotFound {
        dispatch_id: DispatchId,
        node_id: NodeId,
    },

    #[error("No job record for node {node_id} in dispatch {dispatch_id}")]
    JobNotFound {
        dispatch_id: DispatchId,
        node_id: NodeId,
    },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Function '{0}' is not registered")]
    UnknownFunction(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DispatchError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DispatchError::ChannelClosed("receiver dropped")
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Render an error as the human-readable detail stored on a failed node.
///
/// In debug mode the full debug rendering (variant plus source chain) is kept;
/// otherwise only the display message.
pub fn error_detail(err: &DispatchError, debug_mode: bool) -> String {
    if !debug_mode {
        return err.to_string();
    }

    let mut detail = format!("{err:?}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        detail.push_str("\ncaused by: ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}
