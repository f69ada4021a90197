// src/engine/runtime.rs

use std::fmt;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dag::ScheduledTask;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RunEvent, RunResult};

/// Drives one DAG run in response to `RunEvent`s, and delegates actual task
/// execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// run semantics. Events are processed strictly one at a time, so every
/// scheduler transition happens in isolation.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RunEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RunEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// - Dispatches the roots.
    /// - Consumes `RunEvent`s from `event_rx` and feeds them into the core.
    /// - Executes commands returned by the core (spawn tasks, cancel, finish).
    ///
    /// Returns once every task is terminal (or the run was cancelled).
    pub async fn run(mut self) -> Result<RunResult> {
        let run_id = self.core.run_id();
        info!(run_id, "runtime started");

        let step = self.core.start()?;
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    return Err(anyhow!("run {run_id}: event channel closed before the run finished").into());
                }
            };

            debug!(run_id, ?event, "runtime received event");

            let step = self.core.step(event)?;
            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }

        info!(run_id, "runtime exiting");
        self.core.into_result()
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => self.spawn_ready(tasks).await?,
            CoreCommand::CancelRunning => {
                info!(run_id = self.core.run_id(), "cancelling in-flight tasks");
                self.executor.cancel_running().await?;
            }
            CoreCommand::Finish => {
                debug!(run_id = self.core.run_id(), "core reported run finished");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        debug!(?names, run_id = self.core.run_id(), "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }
}
