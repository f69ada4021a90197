// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::dag::{Dag, ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::TaskOutcome;
use crate::errors::{DagflowError, Result};
use crate::exec::callable::TaskOutput;
use crate::exec::context::{RunConfig, TaskContext};
use crate::store::ResultStore;
use crate::types::{BranchLabel, TaskId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Stop every task the executor still has in flight.
    CancelRunning,
    /// Every task is terminal; the run is over.
    Finish,
}

/// Decision returned by the core after handling a single `RunEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub(crate) fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }
}

/// Shared, read-mostly state every handler needs besides the scheduler.
pub(crate) struct RunScope<'a> {
    pub store: &'a dyn ResultStore,
    pub config: &'a Arc<RunConfig>,
}

/// Handle a retry report: the task stays in flight as `retrying`.
pub fn handle_task_retrying(
    scheduler: &mut Scheduler,
    task: &str,
    attempt: u32,
    error: &str,
) -> CoreStep {
    scheduler.handle_retry(task, attempt, error);
    CoreStep::idle()
}

/// Handle a task completion event.
///
/// For a successful task the output is validated (branch label) and written
/// to the result store *before* the scheduler recomputes readiness, so any
/// dependent dispatched by this step can read it.
pub(crate) fn handle_task_completion(
    scheduler: &mut Scheduler,
    scope: &RunScope<'_>,
    task: TaskId,
    outcome: TaskOutcome,
) -> Result<CoreStep> {
    let in_flight = scheduler
        .state_of(&task)
        .map(|s| s.is_active())
        .unwrap_or(false);
    if !in_flight {
        warn!(
            task = %task,
            run_id = scheduler.run_id(),
            "completion for task that is not in flight; ignoring"
        );
        return Ok(CoreStep::idle());
    }

    let outcome = match outcome {
        TaskOutcome::Success { output, attempts } => {
            match settle_output(scheduler.dag(), &task, output) {
                Ok(output) => {
                    scope
                        .store
                        .put(scheduler.run_id(), &task, output.to_value())?;
                    TaskOutcome::Success { output, attempts }
                }
                Err(err) => {
                    warn!(task = %task, run_id = scheduler.run_id(), error = %err, "rejecting task output");
                    TaskOutcome::Failed {
                        error: err.to_string(),
                        attempts,
                    }
                }
            }
        }
        failed @ TaskOutcome::Failed { .. } => failed,
    };

    let step = scheduler.step_completion(&task, &outcome);
    commands_for_step(scheduler, scope, step)
}

/// Handle a cancellation request.
pub fn handle_cancel(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.cancel();
    if !step.run_just_finished {
        return CoreStep::idle();
    }
    CoreStep {
        commands: vec![CoreCommand::CancelRunning, CoreCommand::Finish],
        keep_running: false,
    }
}

/// Translate a scheduler step into IO commands.
pub(crate) fn commands_for_step(
    scheduler: &Scheduler,
    scope: &RunScope<'_>,
    step: SchedulerStep,
) -> Result<CoreStep> {
    let mut commands = Vec::new();

    if !step.newly_scheduled.is_empty() {
        let mut tasks = Vec::with_capacity(step.newly_scheduled.len());
        for name in &step.newly_scheduled {
            tasks.push(build_scheduled_task(scheduler, scope, name)?);
        }
        commands.push(CoreCommand::DispatchTasks(tasks));
    }

    let mut keep_running = true;
    if step.run_just_finished || scheduler.is_finished() {
        commands.push(CoreCommand::Finish);
        keep_running = false;
    }

    Ok(CoreStep {
        commands,
        keep_running,
    })
}

/// Build the dispatch record for `name`, resolving its declared reads.
///
/// A read whose upstream did not succeed (e.g. it was pruned by a branch) is
/// simply absent from `inputs`.
fn build_scheduled_task(
    scheduler: &Scheduler,
    scope: &RunScope<'_>,
    name: &str,
) -> Result<ScheduledTask> {
    let spec = scheduler
        .dag()
        .task(name)
        .ok_or_else(|| DagflowError::UnknownTask(name.to_string()))?;
    let run_id = scheduler.run_id();

    let mut inputs: BTreeMap<TaskId, Value> = BTreeMap::new();
    for read in &spec.reads {
        match scope.store.get(run_id, read) {
            Ok(value) => {
                inputs.insert(read.clone(), value);
            }
            Err(DagflowError::ResultNotFound { .. }) => {
                debug!(task = %name, run_id, upstream = %read, "declared read has no result");
            }
            Err(err) => return Err(err),
        }
    }

    let context = TaskContext {
        run_id,
        task_id: name.to_string(),
        attempt: 1,
        config: Arc::clone(scope.config),
        args: spec.args.clone(),
        inputs,
    };

    Ok(ScheduledTask::new(spec, context))
}

/// Normalise a successful output against the task's kind.
///
/// Branch tasks must name one of their outgoing labels, either as
/// `TaskOutput::Branch` or as a plain string value. Other tasks never carry a
/// branch decision.
fn settle_output(dag: &Dag, task: &str, output: TaskOutput) -> Result<TaskOutput> {
    let is_branch = dag.task(task).map(|t| t.kind.is_branch()).unwrap_or(false);

    if !is_branch {
        return Ok(match output {
            TaskOutput::Branch(label) => TaskOutput::Value(Value::String(label.as_str().to_string())),
            other => other,
        });
    }

    let label = match output {
        TaskOutput::Branch(label) => label,
        TaskOutput::Value(Value::String(s)) => BranchLabel::new(s),
        TaskOutput::Value(other) => {
            return Err(DagflowError::InvalidBranchLabel {
                task: task.to_string(),
                label: other.to_string(),
            });
        }
    };

    dag.validate_branch_label(task, &label)?;
    Ok(TaskOutput::Branch(label))
}
