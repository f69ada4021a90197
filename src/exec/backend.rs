// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production worker pool in [`executor_loop`](super::executor_loop).
//!
//! - `TokioExecutor` is the default implementation. It forwards scheduled
//!   tasks to a background loop that runs each one on its own tokio task,
//!   bounded by a semaphore.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskCompleted` events.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::dag::ScheduledTask;
use crate::engine::RunEvent;
use crate::errors::Result;

use super::executor_loop::{ExecutorMessage, spawn_executor};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting how scheduled tasks are executed.
///
/// Implementations report progress on the run's event channel:
/// `RunEvent::TaskRetrying` for each failed attempt that will be retried and
/// exactly one `RunEvent::TaskCompleted` per dispatched task (unless the task
/// was cancelled).
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_>;

    /// Stop everything still in flight. Cancelled tasks report nothing.
    fn cancel_running(&mut self) -> BackendFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Worker-pool backend used in production.
///
/// Internally, this just wraps the executor loop in [`spawn_executor`].
/// The runtime calls `spawn_ready_tasks`, which forwards the tasks to the
/// background loop via an mpsc channel.
pub struct TokioExecutor {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl TokioExecutor {
    /// Create a new backend reporting on `run_tx`, running at most
    /// `max_parallel` tasks at once.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(run_tx: mpsc::Sender<RunEvent>, max_parallel: usize) -> Self {
        let tx = spawn_executor(run_tx, max_parallel);
        Self { tx }
    }
}

impl ExecutorBackend for TokioExecutor {
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                tx.send(ExecutorMessage::Run(task))
                    .await
                    .map_err(|_| anyhow!("executor loop has stopped"))?;
            }
            Ok(())
        })
    }

    fn cancel_running(&mut self) -> BackendFuture<'_> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorMessage::CancelAll)
                .await
                .map_err(|_| anyhow!("executor loop has stopped"))?;
            Ok(())
        })
    }
}
