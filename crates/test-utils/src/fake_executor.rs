use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dagflow::dag::ScheduledTask;
use dagflow::engine::{RunEvent, TaskOutcome};
use dagflow::errors::DagflowError;
use dagflow::exec::callable::TaskOutput;
use dagflow::exec::{BackendFuture, ExecutorBackend, retry};
use tokio::sync::mpsc;

/// A fake executor that:
/// - records which tasks were "run"
/// - never calls the task's callable
/// - reports the scripted outcome for each task (default: success with
///   `null`).
pub struct FakeExecutor {
    run_tx: mpsc::Sender<RunEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    outcomes: HashMap<String, TaskOutcome>,
}

impl FakeExecutor {
    pub fn new(run_tx: mpsc::Sender<RunEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            run_tx,
            executed,
            outcomes: HashMap::new(),
        }
    }

    /// Script the outcome reported for `task`.
    pub fn with_outcome(mut self, task: &str, outcome: TaskOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }

    pub fn failing(self, task: &str) -> Self {
        self.with_outcome(
            task,
            TaskOutcome::Failed {
                error: format!("{task} failed"),
                attempts: 1,
            },
        )
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_> {
        let tx = self.run_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes: Vec<TaskOutcome> = tasks
            .iter()
            .map(|t| {
                self.outcomes
                    .get(&t.name)
                    .cloned()
                    .unwrap_or(TaskOutcome::Success {
                        output: TaskOutput::none(),
                        attempts: 1,
                    })
            })
            .collect();

        Box::pin(async move {
            {
                let mut guard = executed.lock().unwrap();
                guard.extend(tasks.iter().map(|t| t.name.clone()));
            }

            // Report from a separate task: the runtime is not reading events
            // while it waits for this future.
            tokio::spawn(async move {
                for (t, outcome) in tasks.into_iter().zip(outcomes) {
                    let _ = tx
                        .send(RunEvent::TaskCompleted {
                            task: t.name.clone(),
                            outcome,
                        })
                        .await;
                }
            });
            Ok(())
        })
    }
}

/// Executor that really calls each task (through the retry controller) but
/// one at a time, in dispatch order, without a worker pool.
pub struct InlineExecutor {
    run_tx: mpsc::Sender<RunEvent>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl InlineExecutor {
    pub fn new(run_tx: mpsc::Sender<RunEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self { run_tx, executed }
    }
}

impl ExecutorBackend for InlineExecutor {
    fn spawn_ready_tasks(&mut self, tasks: Vec<ScheduledTask>) -> BackendFuture<'_> {
        let tx = self.run_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            tokio::spawn(async move {
                for t in tasks {
                    executed.lock().unwrap().push(t.name.clone());

                    let mut retried = 0;
                    let retry_tx = tx.clone();
                    let result = retry::execute(
                        t.callable.as_ref(),
                        t.context.clone(),
                        t.retry,
                        |attempt, error| {
                            retried = attempt;
                            let tx = retry_tx.clone();
                            let task = t.name.clone();
                            async move {
                                let _ = tx
                                    .send(RunEvent::TaskRetrying {
                                        task,
                                        attempt,
                                        error,
                                    })
                                    .await;
                            }
                        },
                    )
                    .await;

                    let outcome = match result {
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
                    };

                    let _ = tx
                        .send(RunEvent::TaskCompleted {
                            task: t.name.clone(),
                            outcome,
                        })
                        .await;
                }
            });
            Ok(())
        })
    }
}
