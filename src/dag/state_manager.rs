// src/dag/state_manager.rs

//! Per-run state transitions for tasks in the scheduler.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::dag::graph::Dag;
use crate::dag::task_info::{TaskInfo, TaskState};
use crate::dag::trigger::{Readiness, UpstreamSummary, evaluate};
use crate::types::{BranchLabel, RunId, TaskId};

/// Set of deactivated branch edges, keyed by `(from, to)`.
pub type PrunedEdges = HashSet<(TaskId, TaskId)>;

/// Tasks whose state was decided by one readiness sweep.
#[derive(Debug, Default)]
pub struct ReadySweep {
    pub scheduled: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
}

/// Manages per-run state transitions for tasks.
pub struct StateManager<'a> {
    dag: &'a Dag,
    tasks: &'a mut HashMap<TaskId, TaskInfo>,
    pruned: &'a mut PrunedEdges,
    run_id: RunId,
}

impl<'a> StateManager<'a> {
    pub fn new(
        dag: &'a Dag,
        tasks: &'a mut HashMap<TaskId, TaskInfo>,
        pruned: &'a mut PrunedEdges,
        run_id: RunId,
    ) -> Self {
        Self {
            dag,
            tasks,
            pruned,
            run_id,
        }
    }

    /// Deactivate every outgoing edge of `branch_task` whose label is not
    /// `chosen`. Returns the edges pruned by this call.
    pub fn prune_branch(&mut self, branch_task: &str, chosen: &BranchLabel) -> Vec<(TaskId, TaskId)> {
        let mut newly_pruned = Vec::new();

        for edge in self.dag.downstream_edges(branch_task) {
            if edge.label.as_ref() == Some(chosen) {
                continue;
            }
            let key = (edge.from.clone(), edge.to.clone());
            if self.pruned.insert(key.clone()) {
                debug!(
                    run_id = self.run_id,
                    from = %edge.from,
                    to = %edge.to,
                    chosen = %chosen,
                    "pruned branch edge"
                );
                newly_pruned.push(key);
            }
        }

        newly_pruned
    }

    /// Walk pending tasks in topological order and settle every one whose
    /// trigger rule can now be decided: `Run` becomes `Running`, `Skip`
    /// becomes `Skipped`.
    ///
    /// A single pass is enough because a decision can only influence tasks
    /// later in the order.
    pub fn collect_new_ready_tasks(&mut self) -> ReadySweep {
        let mut sweep = ReadySweep::default();

        for name in self.dag.topological_order() {
            let pending = matches!(
                self.tasks.get(name).map(|t| t.state),
                Some(TaskState::Pending)
            );
            if !pending {
                continue;
            }

            let readiness = ReadOnlyStateManager::new(self.dag, self.tasks, self.pruned)
                .readiness_of(name);

            let Some(info) = self.tasks.get_mut(name) else {
                continue;
            };

            match readiness {
                Readiness::Run => {
                    info!(
                        task = %info.name,
                        run_id = self.run_id,
                        kind = %info.kind,
                        "trigger rule satisfied; scheduling task"
                    );
                    info.state = TaskState::Running;
                    sweep.scheduled.push(info.name.clone());
                }
                Readiness::Skip => {
                    info!(
                        task = %info.name,
                        run_id = self.run_id,
                        rule = %info.kind.trigger_rule(),
                        "trigger rule cannot be met; skipping task"
                    );
                    info.state = TaskState::Skipped;
                    sweep.skipped.push(info.name.clone());
                }
                Readiness::Wait => {}
            }
        }

        sweep
    }

    /// Mark every non-terminal task `Skipped` (cancellation).
    pub fn skip_non_terminal(&mut self) -> Vec<TaskId> {
        let mut skipped = Vec::new();

        for name in self.dag.topological_order() {
            if let Some(info) = self.tasks.get_mut(name) {
                if !info.state.is_terminal() {
                    if info.state.is_active() {
                        warn!(
                            task = %info.name,
                            run_id = self.run_id,
                            "cancelling task while it is still in flight"
                        );
                    }
                    info.state = TaskState::Skipped;
                    skipped.push(info.name.clone());
                }
            }
        }

        skipped
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|info| info.state.is_terminal())
    }
}

/// A read-only view used for readiness checks.
///
/// This is used when we only have shared access to the tasks map (e.g. in
/// [`crate::dag::Scheduler::readiness_of`]).
pub struct ReadOnlyStateManager<'a> {
    dag: &'a Dag,
    tasks: &'a HashMap<TaskId, TaskInfo>,
    pruned: &'a PrunedEdges,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(
        dag: &'a Dag,
        tasks: &'a HashMap<TaskId, TaskInfo>,
        pruned: &'a PrunedEdges,
    ) -> Self {
        Self { dag, tasks, pruned }
    }

    /// State of the upstream end of an edge, as seen by its downstream task.
    ///
    /// A pruned edge reads as `Skipped` regardless of the source's state.
    fn edge_state(&self, from: &str, to: &str) -> TaskState {
        if self.pruned.contains(&(from.to_string(), to.to_string())) {
            return TaskState::Skipped;
        }
        match self.tasks.get(from) {
            Some(info) => info.state,
            None => {
                warn!(task = %to, dep = %from, "dependency missing from tasks map");
                TaskState::Pending
            }
        }
    }

    pub fn upstream_summary(&self, task: &str) -> UpstreamSummary {
        UpstreamSummary::from_states(
            self.dag
                .upstream_edges(task)
                .iter()
                .map(|e| self.edge_state(&e.from, &e.to)),
        )
    }

    /// Trigger rule decision for `task` given the current run state.
    pub fn readiness_of(&self, task: &str) -> Readiness {
        let rule = self
            .tasks
            .get(task)
            .map(|info| info.kind.trigger_rule())
            .unwrap_or_default();
        evaluate(rule, self.upstream_summary(task))
    }
}
