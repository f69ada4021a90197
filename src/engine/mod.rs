// src/engine/mod.rs

//! Orchestration engine for dagflow.
//!
//! This module ties together:
//! - the DAG scheduler (one per run)
//! - the result store (results are written before dependents are evaluated)
//! - the main runtime event loop that reacts to:
//!   - task retry reports
//!   - task completion events
//!   - cancellation requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`runner`] is the public entry point.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::dag::{Dag, TaskState};
use crate::exec::callable::TaskOutput;
use crate::types::{RunId, TaskId};

/// Outcome of a task (after retries) as reported to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success { output: TaskOutput, attempts: u32 },
    Failed { error: String, attempts: u32 },
}

impl TaskOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            TaskOutcome::Success { attempts, .. } | TaskOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Events flowing into the runtime from executors and run handles.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// An attempt failed and the task will be tried again.
    TaskRetrying {
        task: TaskId,
        attempt: u32,
        error: String,
    },
    /// A task finished with a concrete outcome.
    TaskCompleted { task: TaskId, outcome: TaskOutcome },
    /// Stop the run (e.g. Ctrl-C).
    CancelRequested,
}

/// Engine options shared by every run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Maximum number of tasks executing at the same time.
    pub max_parallel: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Everything known about a run once it is over.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub dag: Arc<Dag>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub states: BTreeMap<TaskId, TaskState>,
    pub results: BTreeMap<TaskId, Value>,
    /// Last error of every task that ended `failed`.
    pub errors: BTreeMap<TaskId, String>,
    pub status: RunStatus,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.states.get(task).copied()
    }

    pub fn result_of(&self, task: &str) -> Option<&Value> {
        self.results.get(task)
    }

    pub fn error_of(&self, task: &str) -> Option<&str> {
        self.errors.get(task).map(String::as_str)
    }

    /// Tasks that ended in `state`, in topological order.
    pub fn tasks_in_state(&self, state: TaskState) -> Vec<&str> {
        self.dag
            .tasks()
            .filter(|name| self.state_of(name) == Some(state))
            .collect()
    }
}

pub mod core;
pub mod event_handlers;
pub mod runner;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runner::{Engine, RunHandle};
pub use runtime::Runtime;
