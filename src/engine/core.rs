// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RunEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - cancelling in-flight work
//!
//! The core is unit tested without any Tokio, channels or processes. The
//! only IO it performs is through the [`ResultStore`] trait.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::dag::{Dag, Scheduler, TaskState};
use crate::engine::event_handlers::{
    CoreStep, RunScope, commands_for_step, handle_cancel, handle_task_completion,
    handle_task_retrying,
};
use crate::engine::{RunEvent, RunResult, RunStatus};
use crate::errors::Result;
use crate::exec::context::RunConfig;
use crate::store::ResultStore;
use crate::types::RunId;

/// Pure core runtime state for a single run.
///
/// This owns:
/// - the per-run scheduler
/// - the result store handle
/// - the resolved run configuration
pub struct CoreRuntime {
    scheduler: Scheduler,
    store: Arc<dyn ResultStore>,
    config: Arc<RunConfig>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl CoreRuntime {
    pub fn new(
        dag: Arc<Dag>,
        run_id: RunId,
        store: Arc<dyn ResultStore>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(dag, run_id),
            store,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.scheduler.run_id()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Start the run: dispatch the roots.
    pub fn start(&mut self) -> Result<CoreStep> {
        info!(
            run_id = self.run_id(),
            dag = %self.scheduler.dag().name(),
            tasks = self.scheduler.dag().len(),
            "starting run"
        );
        let step = self.scheduler.start();
        let scope = RunScope {
            store: self.store.as_ref(),
            config: &self.config,
        };
        commands_for_step(&self.scheduler, &scope, step)
    }

    /// Handle a single run event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RunEvent) -> Result<CoreStep> {
        let scope = RunScope {
            store: self.store.as_ref(),
            config: &self.config,
        };
        match event {
            RunEvent::TaskRetrying {
                task,
                attempt,
                error,
            } => Ok(handle_task_retrying(
                &mut self.scheduler,
                &task,
                attempt,
                &error,
            )),
            RunEvent::TaskCompleted { task, outcome } => {
                handle_task_completion(&mut self.scheduler, &scope, task, outcome)
            }
            RunEvent::CancelRequested => Ok(handle_cancel(&mut self.scheduler)),
        }
    }

    /// Overall verdict given the current task states.
    ///
    /// With a declared end task the run succeeds iff that task succeeded;
    /// otherwise it succeeds iff no task failed.
    pub fn status(&self) -> RunStatus {
        if self.scheduler.is_cancelled() {
            return RunStatus::Cancelled;
        }
        let ok = match self.scheduler.dag().end_task() {
            Some(end) => self.scheduler.state_of(end) == Some(TaskState::Success),
            None => self.scheduler.tasks_in_state(TaskState::Failed).is_empty(),
        };
        if ok { RunStatus::Success } else { RunStatus::Failed }
    }

    /// Consume the core and assemble the run summary.
    pub fn into_result(self) -> Result<RunResult> {
        let run_id = self.run_id();
        let status = self.status();
        let result = RunResult {
            run_id,
            dag: Arc::clone(self.scheduler.dag()),
            started_at: self.started_at,
            finished_at: Utc::now(),
            states: self.scheduler.states(),
            results: self.store.run_results(run_id)?,
            errors: self.scheduler.errors(),
            status,
        };

        info!(
            run_id,
            status = %result.status,
            failed = result.errors.len(),
            "run finished"
        );
        Ok(result)
    }
}
