// src/engine/mod.rs

//! Orchestration engine for flowdispatch.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the task group runner (submit, poll, direct fallback)
//! - the job event bus and its listener (result propagation)
//! - per-group cancellation watches
//! - the per-dispatch runtime event loop that reacts to:
//!   - task groups reaching a terminal state
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`dispatcher::Dispatcher`] owns everything
//! shared across dispatches.

use crate::types::{NodeId, NodeStatus};

/// Notifications flowing into a dispatch runtime from runners, the event
/// bus listener and watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Every member of the task group has a persisted terminal status.
    GroupSettled {
        task_group_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Input of the pure dispatch core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Schedule the initial frontier.
    Start,
    /// A task group settled with these persisted member statuses.
    GroupSettled {
        task_group_id: NodeId,
        outcomes: Vec<(NodeId, NodeStatus)>,
    },
    ShutdownRequested,
}

pub mod bus;
pub mod context;
pub mod core;
pub mod dispatcher;
pub mod event_handlers;
pub mod propagation;
pub mod runner;
pub mod runtime;
pub mod watch;

pub use bus::{JobEvent, JobEventBus, JobEvents};
pub use context::DispatchContext;
pub use core::DispatchCore;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
pub use watch::WatchRegistry;
