use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::Dag;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{PrunedEdges, ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{TaskInfo, TaskState};
use crate::dag::trigger::Readiness;
use crate::engine::TaskOutcome;
use crate::types::{RunId, TaskId};

/// Scheduler holds the immutable DAG plus the mutable state of one run.
///
/// It is responsible for:
/// - deciding when a task is "ready" (its trigger rule is satisfied)
/// - marking tasks as running/retrying/succeeded/failed/skipped
/// - pruning branch edges when a branch task picks a label
/// - skipping tasks whose trigger rule can no longer be met
///
/// It is synchronous and does no IO; the engine feeds it completion events
/// one at a time, which makes each transition a critical section and keeps
/// execution exactly-once per task.
#[derive(Debug)]
pub struct Scheduler {
    dag: Arc<Dag>,
    run_id: RunId,
    tasks: HashMap<TaskId, TaskInfo>,
    pruned: PrunedEdges,
    started: bool,
    cancelled: bool,
}

impl Scheduler {
    /// Construct the scheduler for run `run_id`; every task starts `Pending`.
    pub fn new(dag: Arc<Dag>, run_id: RunId) -> Self {
        let tasks = dag
            .tasks()
            .filter_map(|name| {
                dag.task(name)
                    .map(|spec| (name.to_string(), TaskInfo::new(name.to_string(), spec.kind)))
            })
            .collect();

        Self {
            dag,
            run_id,
            tasks,
            pruned: PrunedEdges::new(),
            started: false,
            cancelled: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn dag(&self) -> &Arc<Dag> {
        &self.dag
    }

    /// Returns `true` once every task is terminal.
    pub fn is_finished(&self) -> bool {
        self.tasks.values().all(|info| info.state.is_terminal())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.tasks.get(task).map(|info| info.state)
    }

    /// Snapshot of every task's state.
    pub fn states(&self) -> BTreeMap<TaskId, TaskState> {
        self.tasks
            .iter()
            .map(|(name, info)| (name.clone(), info.state))
            .collect()
    }

    /// Number of attempts reported for `task` in this run.
    pub fn attempts_of(&self, task: &str) -> Option<u32> {
        self.tasks.get(task).map(|info| info.attempts)
    }

    /// Last error recorded for each failed task.
    pub fn errors(&self) -> BTreeMap<TaskId, String> {
        self.tasks
            .iter()
            .filter_map(|(name, info)| info.last_error.clone().map(|e| (name.clone(), e)))
            .collect()
    }

    /// Tasks currently in `state`, in topological order.
    pub fn tasks_in_state(&self, state: TaskState) -> Vec<TaskId> {
        self.dag
            .tasks()
            .filter(|name| self.state_of(name) == Some(state))
            .map(str::to_string)
            .collect()
    }

    /// Whether the edge `from -> to` was deactivated by a branch decision.
    pub fn is_pruned(&self, from: &str, to: &str) -> bool {
        self.pruned.contains(&(from.to_string(), to.to_string()))
    }

    /// Trigger rule decision for `task` right now.
    ///
    /// Returns `None` if the task is unknown.
    pub fn readiness_of(&self, task: &str) -> Option<Readiness> {
        if !self.tasks.contains_key(task) {
            return None;
        }
        let view = ReadOnlyStateManager::new(&self.dag, &self.tasks, &self.pruned);
        Some(view.readiness_of(task))
    }

    /// Begin the run: schedule every task whose trigger rule is already
    /// satisfied (the roots).
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!(run_id = self.run_id, "start called twice; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;
        debug!(run_id = self.run_id, dag = %self.dag.name(), "scheduler: starting run");

        let mut step = SchedulerStep::default();
        self.sweep_into(&mut step);
        step
    }

    /// Record that `task` failed an attempt and will be retried.
    ///
    /// Returns `false` if the task is not in flight (e.g. the run was
    /// cancelled), in which case nothing changes.
    pub fn handle_retry(&mut self, task: &str, attempt: u32, error: &str) -> bool {
        match self.tasks.get_mut(task) {
            Some(info) if info.state.is_active() => {
                info.state = TaskState::Retrying;
                info.attempts = attempt;
                info.last_error = Some(error.to_string());
                debug!(task = %task, run_id = self.run_id, attempt, "task retrying");
                true
            }
            Some(info) => {
                warn!(
                    task = %task,
                    run_id = self.run_id,
                    state = %info.state,
                    "retry report for task that is not in flight; ignoring"
                );
                false
            }
            None => {
                warn!(task = %task, "retry report for unknown task; ignoring");
                false
            }
        }
    }

    /// Handle completion of a task with a concrete outcome.
    pub fn step_completion(&mut self, task: &str, outcome: &TaskOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(info) = self.tasks.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return step;
        };

        if !info.state.is_active() {
            warn!(
                task = %task,
                run_id = self.run_id,
                state = %info.state,
                "completion for task that is not in flight; ignoring"
            );
            return step;
        }

        match outcome {
            TaskOutcome::Success { output, attempts } => {
                info.state = TaskState::Success;
                info.attempts = *attempts;
                info.last_error = None;
                debug!(task = %info.name, run_id = self.run_id, "task completed successfully");

                if let Some(label) = output.branch_label() {
                    info!(task = %task, run_id = self.run_id, label = %label, "branch chose label");
                    let mut manager =
                        StateManager::new(&self.dag, &mut self.tasks, &mut self.pruned, self.run_id);
                    step.pruned_edges = manager.prune_branch(task, label);
                }
            }
            TaskOutcome::Failed { error, attempts } => {
                info.state = TaskState::Failed;
                info.attempts = *attempts;
                info.last_error = Some(error.clone());
                warn!(
                    task = %info.name,
                    run_id = self.run_id,
                    error = %error,
                    "task failed; re-evaluating dependents"
                );
                step.newly_failed.push(info.name.clone());
            }
        }

        self.sweep_into(&mut step);
        step
    }

    /// Cancel the run: every non-terminal task becomes `Skipped` and nothing
    /// new will be scheduled.
    pub fn cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.cancelled || self.is_finished() {
            return step;
        }
        self.cancelled = true;

        let mut manager =
            StateManager::new(&self.dag, &mut self.tasks, &mut self.pruned, self.run_id);
        step.newly_skipped = manager.skip_non_terminal();
        step.run_just_finished = true;
        info!(
            run_id = self.run_id,
            skipped = step.newly_skipped.len(),
            "scheduler: run cancelled"
        );
        step
    }

    fn sweep_into(&mut self, step: &mut SchedulerStep) {
        if self.cancelled {
            return;
        }

        let was_finished = self.is_finished();
        let mut manager =
            StateManager::new(&self.dag, &mut self.tasks, &mut self.pruned, self.run_id);
        let sweep = manager.collect_new_ready_tasks();
        step.newly_scheduled.extend(sweep.scheduled);
        step.newly_skipped.extend(sweep.skipped);

        if manager.all_tasks_terminal() && !was_finished {
            info!(run_id = self.run_id, "scheduler: all tasks terminal; run finished");
            step.run_just_finished = true;
        }
    }
}
