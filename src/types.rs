use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Boxed future returned by the object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Node identifier, stable within one dispatch.
pub type NodeId = usize;

/// Identifier of one running workflow instance.
pub type DispatchId = String;

/// Status of a single node.
///
/// Statuses only move forward: `New -> Running -> terminal`, or straight from
/// `New` to a terminal status (cancelled before submission, configuration
/// errors). Nothing leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    New,
    Running,
    Completed,
    Failed,
    Cancelled,
    FailedRetriesExhausted,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed
                | NodeStatus::Failed
                | NodeStatus::Cancelled
                | NodeStatus::FailedRetriesExhausted
        )
    }

    /// Terminal statuses that block every downstream node.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            NodeStatus::Failed | NodeStatus::Cancelled | NodeStatus::FailedRetriesExhausted
        )
    }

    /// Whether a node currently in `self` may be moved to `next`.
    ///
    /// Re-writing `Running` over `Running` is allowed (refreshing timestamps);
    /// every other same-status write out of a terminal status is refused.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        match self {
            NodeStatus::New => true,
            NodeStatus::Running => next != NodeStatus::New,
            _ => false,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::New => "NEW",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Completed => "COMPLETED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Cancelled => "CANCELLED",
            NodeStatus::FailedRetriesExhausted => "FAILED_RETRIES_EXHAUSTED",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NEW" | "NEW_OBJECT" => Ok(NodeStatus::New),
            "RUNNING" => Ok(NodeStatus::Running),
            "COMPLETED" => Ok(NodeStatus::Completed),
            "FAILED" => Ok(NodeStatus::Failed),
            "CANCELLED" => Ok(NodeStatus::Cancelled),
            "FAILED_RETRIES_EXHAUSTED" => Ok(NodeStatus::FailedRetriesExhausted),
            other => Err(format!("invalid node status: {other}")),
        }
    }
}

/// Aggregate outcome of a whole dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Completed,
    Failed,
    Cancelled,
}

impl DispatchStatus {
    /// Decide the dispatch status from the final node statuses.
    pub fn from_node_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = NodeStatus>,
    {
        let mut any_failed = false;
        let mut any_cancelled = false;
        let mut any_unfinished = false;

        for status in statuses {
            match status {
                NodeStatus::Completed => {}
                NodeStatus::Failed | NodeStatus::FailedRetriesExhausted => any_failed = true,
                NodeStatus::Cancelled => any_cancelled = true,
                NodeStatus::New | NodeStatus::Running => any_unfinished = true,
            }
        }

        if any_failed || any_unfinished {
            DispatchStatus::Failed
        } else if any_cancelled {
            DispatchStatus::Cancelled
        } else {
            DispatchStatus::Completed
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchStatus::Completed => "COMPLETED",
            DispatchStatus::Failed => "FAILED",
            DispatchStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Kind of per-node asset moved between the dispatcher and an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Function,
    Deps,
    CallBefore,
    CallAfter,
    Output,
    Stdout,
    Stderr,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Function => "function",
            AssetKind::Deps => "deps",
            AssetKind::CallBefore => "call_before",
            AssetKind::CallAfter => "call_after",
            AssetKind::Output => "output",
            AssetKind::Stdout => "stdout",
            AssetKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
