// src/exec/executor_loop.rs

//! Main executor loop that manages running tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::RunEvent;
use crate::exec::task_runner::run_task;
use crate::types::TaskId;

/// Message from the backend to the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ScheduledTask),
    CancelAll,
}

/// Internal handle for a currently-running task.
///
/// - `cancel` is used to stop the task when the run is cancelled.
/// - `handle` is the Tokio task that is actually running it.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each scheduled task runs in its own Tokio task, and at most
/// `max_parallel` of them execute at the same time (the rest wait for a
/// semaphore permit). The scheduler never dispatches a task twice in one run;
/// a duplicate request for a task that is still running is ignored.
pub fn spawn_executor(
    run_tx: mpsc::Sender<RunEvent>,
    max_parallel: usize,
) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(32);
    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));

    tokio::spawn(async move {
        info!(max_parallel, "executor loop started");

        let mut active: HashMap<TaskId, ActiveTask> = HashMap::new();

        while let Some(message) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());

            match message {
                ExecutorMessage::Run(task) => {
                    handle_scheduled_task(task, &mut active, &run_tx, &permits);
                }
                ExecutorMessage::CancelAll => cancel_all(&mut active),
            }
        }

        // The run is over; nothing can observe these tasks any more.
        cancel_all(&mut active);
        info!("executor loop finished (channel closed)");
    });

    tx
}

/// Handle a newly scheduled task.
fn handle_scheduled_task(
    task: ScheduledTask,
    active: &mut HashMap<TaskId, ActiveTask>,
    run_tx: &mpsc::Sender<RunEvent>,
    permits: &Arc<Semaphore>,
) {
    let name = task.name.clone();

    if active.contains_key(&name) {
        warn!(
            task = %name,
            run_id = task.run_id,
            "task already running; ignoring duplicate dispatch"
        );
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = run_tx.clone();
    let permits = Arc::clone(permits);
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        run_task(task, rt_tx, cancel_rx, permits).await;
        debug!(task = %spawn_name, "task runner future finished");
    });

    active.insert(
        name,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_all(active: &mut HashMap<TaskId, ActiveTask>) {
    for (name, task) in active.iter_mut() {
        if let Some(cancel) = task.cancel.take() {
            if cancel.send(()).is_err() {
                debug!(task = %name, "task already finished while cancelling");
            } else {
                info!(task = %name, "cancelled running task");
            }
        }
    }
    active.clear();
}
