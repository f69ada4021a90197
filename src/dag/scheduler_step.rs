// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::types::TaskId;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the DAG and make
/// assertions about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tasks that became ready to run as a result of this step (already
    /// marked `Running`).
    pub newly_scheduled: Vec<TaskId>,
    /// Tasks that were newly marked as skipped in this step.
    pub newly_skipped: Vec<TaskId>,
    /// Tasks that were newly marked as failed in this step.
    pub newly_failed: Vec<TaskId>,
    /// Branch edges `(from, to)` deactivated in this step.
    pub pruned_edges: Vec<(TaskId, TaskId)>,
    /// Whether this step made every task terminal.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn is_noop(&self) -> bool {
        self.newly_scheduled.is_empty()
            && self.newly_skipped.is_empty()
            && self.newly_failed.is_empty()
            && self.pruned_edges.is_empty()
            && !self.run_just_finished
    }
}
