// src/engine/event_handlers.rs

//! Event handling logic for the dispatch core.

use crate::dag::{ScheduledGroup, Scheduler, SchedulerStep};
use crate::types::{DispatchStatus, NodeId, NodeStatus};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Persist CANCELLED for nodes blocked by an upstream failure.
    CancelNodes(Vec<NodeId>),
    /// Complete parameter nodes with their constant values.
    CompleteParameters(Vec<NodeId>),
    /// Hand these groups to the task group runner.
    SubmitGroups(Vec<ScheduledGroup>),
    /// The dispatch is finished.
    Finish(DispatchStatus),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Handle the start of a dispatch.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    commands_from_step(scheduler.step_start())
}

/// Handle a settled task group.
pub fn handle_group_settled(
    scheduler: &mut Scheduler,
    task_group_id: NodeId,
    outcomes: &[(NodeId, NodeStatus)],
) -> CoreStep {
    commands_from_step(scheduler.step_settled(task_group_id, outcomes))
}

/// Handle a shutdown request: stop without waiting for in-flight groups.
pub fn handle_shutdown(scheduler: &Scheduler) -> CoreStep {
    let status = scheduler.finished().unwrap_or_else(|| {
        DispatchStatus::from_node_statuses(scheduler.statuses().values().copied())
    });
    CoreStep {
        commands: vec![CoreCommand::Finish(status)],
        keep_running: false,
    }
}

/// Translate a scheduler step into shell commands.
///
/// Cancellations are persisted first so downstream state is on record
/// before anything new is submitted.
pub fn commands_from_step(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.newly_cancelled.is_empty() {
        commands.push(CoreCommand::CancelNodes(step.newly_cancelled));
    }
    if !step.parameters.is_empty() {
        commands.push(CoreCommand::CompleteParameters(step.parameters));
    }
    if !step.groups.is_empty() {
        commands.push(CoreCommand::SubmitGroups(step.groups));
    }

    let keep_running = match step.run_just_finished {
        Some(status) => {
            commands.push(CoreCommand::Finish(status));
            false
        }
        None => true,
    };

    CoreStep {
        commands,
        keep_running,
    }
}
