// src/engine/runner.rs

//! Public entry point: [`Engine`] allocates run ids and launches runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dag::Dag;
use crate::engine::core::CoreRuntime;
use crate::engine::runtime::Runtime;
use crate::engine::{RunEvent, RunOptions, RunResult};
use crate::errors::Result;
use crate::exec::{ExecutorBackend, TokioExecutor};
use crate::exec::context::RunConfig;
use crate::store::{MemoryResultStore, ResultStore};
use crate::types::RunId;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Runs DAGs against a shared result store.
///
/// Run ids increase monotonically per engine. When the store already holds
/// results (e.g. a replayed file log), numbering continues after the highest
/// stored run id so earlier results are never shadowed.
pub struct Engine {
    store: Arc<dyn ResultStore>,
    options: RunOptions,
    next_run_id: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("next_run_id", &self.next_run_id)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(store: Arc<dyn ResultStore>, options: RunOptions) -> Result<Self> {
        let first = store.max_run_id()?.map(|id| id + 1).unwrap_or(1);
        debug!(first_run_id = first, ?options, "engine created");
        Ok(Self {
            store,
            options,
            next_run_id: AtomicU64::new(first),
        })
    }

    /// Engine backed by a fresh in-memory store.
    pub fn in_memory(options: RunOptions) -> Self {
        Self {
            store: Arc::new(MemoryResultStore::new()),
            options,
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// Execute `dag` to completion with the tokio worker pool.
    pub async fn run(&self, dag: &Arc<Dag>, config: RunConfig) -> Result<RunResult> {
        self.start(dag, config)?.wait().await
    }

    /// Launch `dag` in the background and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, dag: &Arc<Dag>, config: RunConfig) -> Result<RunHandle> {
        let max_parallel = self.options.max_parallel;
        self.start_with(dag, config, move |tx| TokioExecutor::new(tx, max_parallel))
    }

    /// Like [`Engine::run`], but with a caller-supplied executor backend.
    pub async fn run_with<E, F>(
        &self,
        dag: &Arc<Dag>,
        config: RunConfig,
        make_executor: F,
    ) -> Result<RunResult>
    where
        E: ExecutorBackend + 'static,
        F: FnOnce(mpsc::Sender<RunEvent>) -> E,
    {
        self.start_with(dag, config, make_executor)?.wait().await
    }

    /// Like [`Engine::start`], but with a caller-supplied executor backend.
    ///
    /// `make_executor` receives the sender the backend must report
    /// `TaskRetrying`/`TaskCompleted` events on.
    pub fn start_with<E, F>(
        &self,
        dag: &Arc<Dag>,
        config: RunConfig,
        make_executor: F,
    ) -> Result<RunHandle>
    where
        E: ExecutorBackend + 'static,
        F: FnOnce(mpsc::Sender<RunEvent>) -> E,
    {
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel::<RunEvent>(EVENT_CHANNEL_CAPACITY);

        let executor = make_executor(tx.clone());
        let core = CoreRuntime::new(
            Arc::clone(dag),
            run_id,
            Arc::clone(&self.store),
            Arc::new(config),
        );
        let runtime = Runtime::new(core, rx, executor);

        info!(run_id, dag = %dag.name(), "launching run");
        let join = tokio::spawn(runtime.run());

        Ok(RunHandle {
            run_id,
            canceller: Canceller { events: tx },
            join,
        })
    }
}

/// Cloneable handle that can cancel a run (e.g. from a Ctrl-C listener).
#[derive(Debug, Clone)]
pub struct Canceller {
    events: mpsc::Sender<RunEvent>,
}

impl Canceller {
    /// Ask the run to stop. A run that already finished is left alone.
    pub async fn cancel(&self) {
        if self.events.send(RunEvent::CancelRequested).await.is_err() {
            debug!("cancel requested for a run that already finished");
        }
    }
}

/// Handle to a run launched with [`Engine::start`].
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    canceller: Canceller,
    join: JoinHandle<Result<RunResult>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub async fn cancel(&self) {
        self.canceller.cancel().await;
    }

    /// Wait for the run to finish and return its summary.
    pub async fn wait(self) -> Result<RunResult> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("run {} did not complete: {e}", self.run_id).into()),
        }
    }
}
