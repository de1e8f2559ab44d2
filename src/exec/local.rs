// src/exec/local.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::errors::{DispatchError, Result};
use crate::exec::adapter::ExecutorAdapter;
use crate::exec::functions::FunctionRegistry;
use crate::types::BoxFuture;

/// Direct-model executor running node functions on Tokio's blocking pool.
///
/// It has no notion of task groups: every call runs exactly one node.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    functions: Arc<FunctionRegistry>,
}

impl LocalExecutor {
    pub const NAME: &'static str = "local";

    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }
}

impl ExecutorAdapter for LocalExecutor {
    fn short_name(&self) -> &str {
        Self::NAME
    }

    fn execute<'a>(
        &'a self,
        function: &'a str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let f = self.functions.get(function)?;
            debug!(function, "running function on blocking pool");

            tokio::task::spawn_blocking(move || f(args, kwargs))
                .await
                .map_err(|e| DispatchError::TaskFailed(format!("worker panicked: {e}")))?
                .map_err(DispatchError::TaskFailed)
        })
    }
}
