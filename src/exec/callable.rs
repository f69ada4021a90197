// src/exec/callable.rs

//! The task callable abstraction.
//!
//! A callable is anything that can turn a [`TaskContext`] into a
//! [`TaskOutput`] asynchronously. The engine never cares what a callable does
//! (run a shell command, call a trainer, send a mail); it only stores the
//! output and, for branch tasks, follows the returned label.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::exec::context::TaskContext;
use crate::types::BranchLabel;

/// What a task returns on success.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// A plain value, stored in the result store for downstream readers.
    Value(Value),
    /// The label chosen by a branch task.
    Branch(BranchLabel),
}

impl TaskOutput {
    /// A task that returns nothing useful.
    pub fn none() -> Self {
        TaskOutput::Value(Value::Null)
    }

    pub fn branch(label: impl Into<BranchLabel>) -> Self {
        TaskOutput::Branch(label.into())
    }

    /// The value written to the result store for this output.
    pub fn to_value(&self) -> Value {
        match self {
            TaskOutput::Value(v) => v.clone(),
            TaskOutput::Branch(label) => Value::String(label.as_str().to_string()),
        }
    }

    pub fn branch_label(&self) -> Option<&BranchLabel> {
        match self {
            TaskOutput::Branch(label) => Some(label),
            TaskOutput::Value(_) => None,
        }
    }
}

impl From<Value> for TaskOutput {
    fn from(v: Value) -> Self {
        TaskOutput::Value(v)
    }
}

/// Boxed future returned by [`TaskCallable::call`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<TaskOutput>> + Send + 'a>>;

/// Trait abstracting a unit of work.
pub trait TaskCallable: Send + Sync {
    fn call(&self, ctx: TaskContext) -> TaskFuture<'_>;

    /// Short human-readable description for dry-run output and logs.
    fn describe(&self) -> String {
        "callable".to_string()
    }
}

impl fmt::Debug for dyn TaskCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskCallable({})", self.describe())
    }
}

/// Adapter turning an async closure into a [`TaskCallable`].
pub struct FnTask<F> {
    f: F,
}

impl<F, Fut> TaskCallable for FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
{
    fn call(&self, ctx: TaskContext) -> TaskFuture<'_> {
        Box::pin((self.f)(ctx))
    }

    fn describe(&self) -> String {
        "fn".to_string()
    }
}

/// Wrap an async closure as a shareable callable.
///
/// ```ignore
/// let train = task_fn(|ctx| async move {
///     Ok(TaskOutput::Value(serde_json::json!(412.0)))
/// });
/// ```
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskCallable>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
{
    Arc::new(FnTask { f })
}

/// A callable that does nothing and succeeds (start/end markers).
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyTask;

impl TaskCallable for EmptyTask {
    fn call(&self, _ctx: TaskContext) -> TaskFuture<'_> {
        Box::pin(async { Ok(TaskOutput::none()) })
    }

    fn describe(&self) -> String {
        "empty".to_string()
    }
}

pub fn empty_task() -> Arc<dyn TaskCallable> {
    Arc::new(EmptyTask)
}
