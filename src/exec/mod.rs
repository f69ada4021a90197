// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`callable`] defines the `TaskCallable` abstraction and task outputs.
//! - [`context`] holds the run configuration and per-call task context.
//! - [`retry`] is the retry/failure controller wrapped around every call.
//! - [`command`] runs shell commands for config-defined tasks.
//! - [`executor_loop`] owns the background loop which manages running tasks.
//! - [`task_runner`] runs one task: permit, retries, completion report.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `TokioExecutor` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod callable;
pub mod command;
pub mod context;
pub mod executor_loop;
pub mod retry;
pub mod task_runner;

pub use backend::{BackendFuture, ExecutorBackend, TokioExecutor};
pub use callable::{TaskCallable, TaskOutput, empty_task, task_fn};
pub use command::CommandTask;
pub use context::{RunConfig, TaskContext};
pub use retry::{Backoff, RetryPolicy};
