// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::task_group::ScheduledGroup;
use crate::types::{DispatchStatus, NodeId};

/// Structured result of a single scheduler "step".
///
/// Tests step the scheduler by hand and assert on exactly what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Parameter nodes that became runnable; they complete without an executor.
    pub parameters: Vec<NodeId>,
    /// Task groups that became ready to submit.
    pub groups: Vec<ScheduledGroup>,
    /// Nodes cancelled in this step because an upstream node did not complete.
    pub newly_cancelled: Vec<NodeId>,
    /// Set when this step finished the dispatch.
    pub run_just_finished: Option<DispatchStatus>,
}

impl SchedulerStep {
    /// True if the step produced nothing for the shell to do.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
            && self.groups.is_empty()
            && self.newly_cancelled.is_empty()
            && self.run_just_finished.is_none()
    }
}
