// src/engine/core.rs

//! Pure dispatch core state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`DispatchEvent`]s and produces:
//! - an updated scheduler state
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading notifications from channels
//! - persisting statuses and completing parameter nodes
//! - handing ready groups to the task group runner
//!
//! The core is unit tested without any Tokio, channels or stores.

use std::sync::Arc;

use crate::dag::{DependencyGraph, Scheduler};
use crate::engine::DispatchEvent;
use crate::engine::event_handlers::{
    CoreStep, handle_group_settled, handle_shutdown, handle_start,
};
use crate::types::DispatchStatus;

/// Pure core state of one dispatch.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct DispatchCore {
    scheduler: Scheduler,
}

impl DispatchCore {
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        Self {
            scheduler: Scheduler::new(graph),
        }
    }

    pub fn finished(&self) -> Option<DispatchStatus> {
        self.scheduler.finished()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: DispatchEvent) -> CoreStep {
        match event {
            DispatchEvent::Start => handle_start(&mut self.scheduler),
            DispatchEvent::GroupSettled {
                task_group_id,
                outcomes,
            } => handle_group_settled(&mut self.scheduler, task_group_id, &outcomes),
            DispatchEvent::ShutdownRequested => handle_shutdown(&self.scheduler),
        }
    }
}
