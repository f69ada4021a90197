// src/exec/task_runner.rs

//! Individual task runner: permit, retries, completion report.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, error, info};

use crate::dag::ScheduledTask;
use crate::engine::{RunEvent, TaskOutcome};
use crate::errors::DagflowError;
use crate::exec::retry;

/// Run a single task under its retry policy and emit `TaskCompleted`.
///
/// - Each failed attempt that will be retried is reported as
///   `TaskRetrying` before the next attempt starts.
/// - If the cancel channel fires (or its sender is dropped), the task future
///   is dropped, which also kills any child process it spawned, and **no**
///   `TaskCompleted` event is sent.
pub async fn run_task(
    task: ScheduledTask,
    run_tx: mpsc::Sender<RunEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
    permits: Arc<Semaphore>,
) {
    let name = task.name.clone();
    let run_id = task.run_id;

    tokio::select! {
        outcome = execute(task, &run_tx, permits) => {
            info!(
                task = %name,
                run_id,
                attempts = outcome.attempts(),
                success = matches!(outcome, TaskOutcome::Success { .. }),
                "task finished"
            );
            if run_tx
                .send(RunEvent::TaskCompleted { task: name.clone(), outcome })
                .await
                .is_err()
            {
                error!(task = %name, run_id, "runtime gone; dropping TaskCompleted event");
            }
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => info!(task = %name, run_id, "task cancelled"),
                Err(_) => debug!(task = %name, run_id, "cancel channel closed; stopping task"),
            }
        }
    }
}

async fn execute(
    task: ScheduledTask,
    run_tx: &mpsc::Sender<RunEvent>,
    permits: Arc<Semaphore>,
) -> TaskOutcome {
    let _permit = match permits.acquire_owned().await {
        Ok(p) => p,
        Err(e) => {
            return TaskOutcome::Failed {
                error: format!("worker pool closed: {e}"),
                attempts: 0,
            };
        }
    };

    info!(
        task = %task.name,
        run_id = task.run_id,
        callable = %task.callable.describe(),
        max_attempts = task.retry.max_attempts(),
        "starting task"
    );

    let mut retried = 0;
    let result = retry::execute(
        task.callable.as_ref(),
        task.context.clone(),
        task.retry,
        |attempt, error| {
            retried = attempt;
            let tx = run_tx.clone();
            let name = task.name.clone();
            async move {
                if tx
                    .send(RunEvent::TaskRetrying {
                        task: name.clone(),
                        attempt,
                        error,
                    })
                    .await
                    .is_err()
                {
                    debug!(task = %name, attempt, "runtime gone; dropping TaskRetrying event");
                }
            }
        },
    )
    .await;

    match result {
        Ok(output) => TaskOutcome::Success {
            output,
            attempts: retried + 1,
        },
        Err(DagflowError::TaskExecution {
            attempts, message, ..
        }) => TaskOutcome::Failed {
            error: message,
            attempts,
        },
        Err(other) => TaskOutcome::Failed {
            error: other.to_string(),
            attempts: retried + 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::{Value, json};

    use crate::exec::callable::{TaskOutput, task_fn};
    use crate::exec::context::{RunConfig, TaskContext};
    use crate::exec::retry::RetryPolicy;

    fn flaky(calls: Arc<AtomicU32>, failures: u32) -> ScheduledTask {
        let callable = task_fn(move |_ctx| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    anyhow::bail!("not yet");
                }
                Ok(TaskOutput::Value(json!(420)))
            }
        });
        ScheduledTask {
            name: "train".into(),
            callable,
            retry: RetryPolicy::retries(2),
            context: TaskContext {
                run_id: 1,
                task_id: "train".into(),
                attempt: 1,
                config: Arc::new(RunConfig::new()),
                args: Value::Null,
                inputs: BTreeMap::new(),
            },
            run_id: 1,
        }
    }

    #[tokio::test]
    async fn reports_retries_then_completion() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        run_task(flaky(Arc::clone(&calls), 1), tx, cancel_rx, Arc::new(Semaphore::new(1))).await;

        assert!(matches!(
            rx.recv().await,
            Some(RunEvent::TaskRetrying { ref task, attempt: 1, .. }) if task == "train"
        ));
        match rx.recv().await {
            Some(RunEvent::TaskCompleted {
                outcome: TaskOutcome::Success { output, attempts },
                ..
            }) => {
                assert_eq!(output, TaskOutput::Value(json!(420)));
                assert_eq!(attempts, 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keeps_retrying_after_the_runtime_goes_away() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        run_task(flaky(Arc::clone(&calls), 2), tx, cancel_rx, Arc::new(Semaphore::new(1))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
