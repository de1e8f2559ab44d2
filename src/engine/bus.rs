// src/engine/bus.rs

//! Job event bus.
//!
//! Every task group completion funnels through this one queue, whether it
//! was discovered by polling or pushed by the executor. A single listener
//! consumes it:
//! - `Ready` spawns a result fetch for the group.
//! - `Failed` stamps every member FAILED directly, skipping the fetch.
//! - `Shutdown` stops the listener.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::context::DispatchContext;
use crate::engine::propagation;
use crate::errors::Result;
use crate::exec::TaskGroupMetadata;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Ready {
        meta: TaskGroupMetadata,
    },
    Failed {
        meta: TaskGroupMetadata,
        detail: String,
    },
    /// Stops the listener.
    Shutdown,
}

/// Producer side of the bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobEvents {
    tx: mpsc::Sender<JobEvent>,
}

impl JobEvents {
    pub async fn mark_ready(&self, meta: TaskGroupMetadata) -> Result<()> {
        self.tx.send(JobEvent::Ready { meta }).await?;
        Ok(())
    }

    pub async fn mark_failed(&self, meta: TaskGroupMetadata, detail: impl Into<String>) -> Result<()> {
        self.tx
            .send(JobEvent::Failed {
                meta,
                detail: detail.into(),
            })
            .await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(JobEvent::Shutdown).await?;
        Ok(())
    }
}

/// Consumer side of the bus, turned into the listener task.
#[derive(Debug)]
pub struct JobEventBus {
    rx: mpsc::Receiver<JobEvent>,
}

impl JobEventBus {
    pub fn new(capacity: usize) -> (JobEvents, JobEventBus) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (JobEvents { tx }, JobEventBus { rx })
    }

    pub fn spawn_listener(self, ctx: Arc<DispatchContext>) -> JoinHandle<()> {
        tokio::spawn(listen(self.rx, ctx))
    }
}

async fn listen(mut rx: mpsc::Receiver<JobEvent>, ctx: Arc<DispatchContext>) {
    info!("job event listener started");

    while let Some(event) = rx.recv().await {
        match event {
            JobEvent::Ready { meta } => {
                debug!(
                    dispatch_id = %meta.dispatch_id,
                    task_group_id = meta.task_group_id,
                    "task group ready; fetching results"
                );
                tokio::spawn(propagation::fetch_task_group_results(
                    Arc::clone(&ctx),
                    meta,
                ));
            }
            JobEvent::Failed { meta, detail } => {
                if let Err(err) = propagation::fail_task_group(&ctx, &meta, &detail).await {
                    error!(
                        dispatch_id = %meta.dispatch_id,
                        task_group_id = meta.task_group_id,
                        error = %err,
                        "failed to record task group failure"
                    );
                }
            }
            JobEvent::Shutdown => {
                info!("job event listener received shutdown");
                break;
            }
        }
    }

    info!("job event listener exiting");
}
