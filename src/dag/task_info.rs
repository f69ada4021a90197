// src/dag/task_info.rs

//! Task definitions, per-run task state, and the dispatch record sent to
//! executors.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::exec::callable::TaskCallable;
use crate::exec::context::TaskContext;
use crate::exec::retry::RetryPolicy;
use crate::types::{RunId, TaskId, TriggerRule};

/// What role a task plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskKind {
    /// Runs when every upstream task succeeded.
    #[default]
    Normal,
    /// Like `Normal`, but its output selects which outgoing edges stay active.
    Branch,
    /// Gated by an explicit policy over its upstream tasks' final states.
    Join(TriggerRule),
}

impl TaskKind {
    /// The trigger rule this kind is evaluated with.
    pub fn trigger_rule(&self) -> TriggerRule {
        match self {
            TaskKind::Normal | TaskKind::Branch => TriggerRule::AllSuccess,
            TaskKind::Join(rule) => *rule,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, TaskKind::Branch)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Normal => f.write_str("normal"),
            TaskKind::Branch => f.write_str("branch"),
            TaskKind::Join(rule) => write!(f, "join({rule})"),
        }
    }
}

/// Static definition of a task, registered with the graph builder.
#[derive(Clone)]
pub struct TaskSpec {
    pub id: TaskId,
    pub callable: Arc<dyn TaskCallable>,
    pub retry: RetryPolicy,
    pub kind: TaskKind,
    /// Upstream tasks whose results this task reads.
    pub reads: Vec<TaskId>,
    /// Literal arguments, available as [`TaskContext::args`].
    pub args: Value,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, callable: Arc<dyn TaskCallable>) -> Self {
        Self {
            id: id.into(),
            callable,
            retry: RetryPolicy::none(),
            kind: TaskKind::Normal,
            reads: Vec::new(),
            args: Value::Null,
        }
    }

    pub fn branch(mut self) -> Self {
        self.kind = TaskKind::Branch;
        self
    }

    pub fn join(mut self, rule: TriggerRule) -> Self {
        self.kind = TaskKind::Join(rule);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn reads(mut self, task: impl Into<TaskId>) -> Self {
        self.reads.push(task.into());
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("callable", &self.callable.describe())
            .field("retry", &self.retry)
            .field("kind", &self.kind)
            .field("reads", &self.reads)
            .field("args", &self.args)
            .finish()
    }
}

/// Per-run state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its trigger rule to be decided.
    Pending,
    /// Dispatched to the executor.
    Running,
    /// A previous attempt failed; another attempt is pending or in flight.
    Retrying,
    Success,
    /// Failed after exhausting its retries.
    Failed,
    /// Never ran: pruned by a branch, blocked by an upstream failure, or
    /// cancelled.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failed | TaskState::Skipped
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Retrying)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-run bookkeeping for one task (internal to the scheduler).
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Attempts reported so far in this run.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl TaskInfo {
    pub fn new(name: TaskId, kind: TaskKind) -> Self {
        Self {
            name,
            kind,
            state: TaskState::Pending,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Description of a task that the engine wants an executor to run now.
#[derive(Clone)]
pub struct ScheduledTask {
    pub name: TaskId,
    pub callable: Arc<dyn TaskCallable>,
    pub retry: RetryPolicy,
    pub context: TaskContext,
    /// All tasks dispatched for the same DAG run share the same `run_id`.
    pub run_id: RunId,
}

impl ScheduledTask {
    pub fn new(spec: &TaskSpec, context: TaskContext) -> Self {
        Self {
            name: spec.id.clone(),
            callable: Arc::clone(&spec.callable),
            retry: spec.retry,
            run_id: context.run_id,
            context,
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
