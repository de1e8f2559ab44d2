// src/exec/registry.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::dag::node::ExecutorSelection;
use crate::engine::bus::JobEvents;
use crate::errors::{DispatchError, Result};
use crate::exec::adapter::ExecutorAdapter;
use crate::exec::batch::{BatchExecutor, BatchQueue};
use crate::exec::functions::FunctionRegistry;
use crate::exec::local::LocalExecutor;
use crate::store::AssetTransfer;
use crate::types::NodeId;

/// Collaborators handed to every executor built by the registry.
#[derive(Debug, Clone)]
pub struct ExecutorEnv {
    pub assets: Arc<dyn AssetTransfer>,
    /// Push channel for executors that report completion themselves.
    pub events: JobEvents,
}

/// Builds a configured executor from its persisted config blob.
pub type ExecutorFactory =
    Arc<dyn Fn(&ExecutorEnv, &Value) -> Result<Arc<dyn ExecutorAdapter>> + Send + Sync>;

/// Maps executor short names to constructors.
///
/// Executors are rebuilt from `(name, config)` whenever the dispatcher
/// needs one, so a factory must return an equivalent executor for equal
/// inputs. Factories that front a shared backend capture it.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ExecutorRegistry")
            .field("executors", &names)
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `local` (direct) and `batch` (managed) executors.
    pub fn with_builtins(functions: Arc<FunctionRegistry>) -> Self {
        let mut registry = Self::new();

        let local_fns = Arc::clone(&functions);
        registry.register(LocalExecutor::NAME, move |_env, _config| {
            Ok(Arc::new(LocalExecutor::new(Arc::clone(&local_fns))) as Arc<dyn ExecutorAdapter>)
        });

        let queue = BatchQueue::default();
        registry.register(BatchExecutor::NAME, move |env, config| {
            let executor = BatchExecutor::from_config(
                queue.clone(),
                Arc::clone(&functions),
                env.clone(),
                config,
            )?;
            Ok(Arc::new(executor) as Arc<dyn ExecutorAdapter>)
        });

        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ExecutorEnv, &Value) -> Result<Arc<dyn ExecutorAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Reconstruct the executor selected for task group `task_group_id`.
    pub fn get_executor(
        &self,
        task_group_id: NodeId,
        selection: &ExecutorSelection,
        env: &ExecutorEnv,
    ) -> Result<Arc<dyn ExecutorAdapter>> {
        let factory = self
            .factories
            .get(&selection.name)
            .ok_or_else(|| DispatchError::UnknownExecutor(selection.name.clone()))?;

        debug!(
            task_group_id,
            executor = %selection.name,
            "building executor"
        );
        factory(env, &selection.config)
    }
}
