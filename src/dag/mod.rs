// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`node`] defines nodes, edges and executor selection.
//! - [`graph`] holds the dependency graph and its readiness queries.
//! - [`scheduler`] contains the per-dispatch state machine that decides
//!   which task groups are ready and when the dispatch is finished.
//! - [`task_group`] provides the scheduled task group type.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-dispatch state transitions.

pub mod graph;
pub mod node;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_group;

pub use graph::{DependencyGraph, Levels};
pub use node::{Edge, EdgeMetadata, ExecutorSelection, Node, NodeType, ParamType};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_group::ScheduledGroup;
