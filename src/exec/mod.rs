// src/exec/mod.rs

//! Execution layer.
//!
//! - [`adapter`] defines the `ExecutorAdapter` contract and the types that
//!   cross it (task specs, resource maps, job handles, per-node results).
//! - [`registry`] rebuilds configured executors from their short name and
//!   config blob.
//! - [`functions`] holds the named callables node functions resolve to.
//! - [`local`] is the direct-model executor.
//! - [`batch`] is a managed executor over an in-process batch queue.
//! - [`cancel_pool`] runs blocking `cancel` calls off the async runtime.

pub mod adapter;
pub mod batch;
pub mod cancel_pool;
pub mod functions;
pub mod local;
pub mod registry;

pub use adapter::{
    ExecutorAdapter, JobHandle, PollStatus, ResourceMap, TaskGroupMetadata, TaskResult, TaskSpec,
};
pub use batch::{BatchExecutor, BatchQueue};
pub use cancel_pool::CancelPool;
pub use functions::FunctionRegistry;
pub use local::LocalExecutor;
pub use registry::{ExecutorEnv, ExecutorFactory, ExecutorRegistry};
