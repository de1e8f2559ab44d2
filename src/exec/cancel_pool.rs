// src/exec/cancel_pool.rs

//! Dedicated worker threads for blocking `cancel` calls.
//!
//! Executor cancellation may block on a remote service, so it never runs on
//! the async runtime. Requests go through a bounded work channel to a fixed
//! set of OS threads; each request gets its answer back on a oneshot.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{DispatchError, Result};
use crate::exec::adapter::{ExecutorAdapter, JobHandle};

struct CancelJob {
    executor: Arc<dyn ExecutorAdapter>,
    handle: JobHandle,
    reply: oneshot::Sender<Result<bool>>,
}

pub struct CancelPool {
    tx: Mutex<Option<mpsc::Sender<CancelJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for CancelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("CancelPool")
            .field("workers", &workers)
            .finish_non_exhaustive()
    }
}

impl CancelPool {
    /// Start `workers` threads sharing a queue of `capacity` pending requests.
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<CancelJob>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("flowdispatch-cancel-{i}"))
                .spawn(move || worker_loop(i, rx))?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        })
    }

    /// Run `executor.cancel(handle)` on a worker and wait for its answer.
    pub async fn cancel(
        &self,
        executor: Arc<dyn ExecutorAdapter>,
        handle: JobHandle,
    ) -> Result<bool> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DispatchError::ChannelClosed("cancel pool shut down"))?;

        let (reply, rx) = oneshot::channel();
        tx.send(CancelJob {
            executor,
            handle,
            reply,
        })
        .await?;

        rx.await
            .map_err(|_| DispatchError::ChannelClosed("cancel worker dropped the request"))?
    }

    /// Close the work queue and wait for every worker to drain it.
    pub async fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.join().is_err() {
                    warn!("cancel worker panicked");
                }
            }
        })
        .await;
        if let Err(err) = joined {
            warn!(error = %err, "failed to join cancel workers");
        }
    }
}

fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<CancelJob>>>) {
    loop {
        let job = {
            let mut rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.blocking_recv()
        };
        let Some(job) = job else {
            debug!(worker = id, "cancel queue closed; worker exiting");
            return;
        };

        debug!(
            worker = id,
            executor = job.executor.short_name(),
            "cancelling job"
        );
        let res = job.executor.cancel(&job.handle);
        // The requester may have given up waiting.
        let _ = job.reply.send(res);
    }
}
