// src/store/mod.rs

//! Result store: write-once task outputs keyed by `(run id, task id)`.
//!
//! - [`memory`] keeps results in a map for the lifetime of the process.
//! - [`file`] appends results to a checksummed log and replays it on open,
//!   so results of earlier runs survive a restart.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::Result;
use crate::types::{ResultStorageMode, RunId, TaskId};

pub mod file;
pub mod memory;

pub use file::FileResultStore;
pub use memory::MemoryResultStore;

/// Abstract storage for task results.
///
/// Implementations must make a successful `put` visible to every later
/// `get` (the engine writes a result before it marks downstream tasks
/// ready).
pub trait ResultStore: Send + Sync {
    /// Store the result of `task` in `run_id`.
    ///
    /// Fails with `DuplicateResult` if that key was already written.
    fn put(&self, run_id: RunId, task: &str, value: Value) -> Result<()>;

    /// Fetch a stored result; `ResultNotFound` if absent.
    fn get(&self, run_id: RunId, task: &str) -> Result<Value>;

    /// All results written for `run_id`.
    fn run_results(&self, run_id: RunId) -> Result<BTreeMap<TaskId, Value>>;

    /// Highest run id that has at least one stored result.
    fn max_run_id(&self) -> Result<Option<RunId>>;
}

/// Open the store selected by `mode`, rooted at `root` for file storage.
pub fn open_store(mode: ResultStorageMode, root: &Path) -> Result<Arc<dyn ResultStore>> {
    match mode {
        ResultStorageMode::Memory => Ok(Arc::new(MemoryResultStore::new())),
        ResultStorageMode::File => Ok(Arc::new(FileResultStore::open(root)?)),
    }
}
