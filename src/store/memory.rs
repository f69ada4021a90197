// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use crate::errors::{DagflowError, Result};
use crate::store::ResultStore;
use crate::types::{RunId, TaskId};

/// Stores results in memory only.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    map: RwLock<HashMap<(RunId, TaskId), Value>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results across all runs.
    pub fn len(&self) -> usize {
        self.map.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a result recovered from elsewhere (e.g. a replayed log),
    /// keeping the first value if the key already exists.
    pub(crate) fn insert_recovered(&self, run_id: RunId, task: TaskId, value: Value) -> Result<()> {
        let mut map = self.map.write().map_err(poisoned)?;
        map.entry((run_id, task)).or_insert(value);
        Ok(())
    }
}

fn poisoned<T>(_: T) -> DagflowError {
    DagflowError::Other(anyhow::anyhow!("result store lock poisoned"))
}

impl ResultStore for MemoryResultStore {
    fn put(&self, run_id: RunId, task: &str, value: Value) -> Result<()> {
        let mut map = self.map.write().map_err(poisoned)?;
        let key = (run_id, task.to_string());
        if map.contains_key(&key) {
            return Err(DagflowError::DuplicateResult {
                run_id,
                task: task.to_string(),
            });
        }
        map.insert(key, value);
        debug!(task = %task, run_id, "stored task result (memory)");
        Ok(())
    }

    fn get(&self, run_id: RunId, task: &str) -> Result<Value> {
        let map = self.map.read().map_err(poisoned)?;
        map.get(&(run_id, task.to_string()))
            .cloned()
            .ok_or_else(|| DagflowError::ResultNotFound {
                run_id,
                task: task.to_string(),
            })
    }

    fn run_results(&self, run_id: RunId) -> Result<BTreeMap<TaskId, Value>> {
        let map = self.map.read().map_err(poisoned)?;
        Ok(map
            .iter()
            .filter(|((run, _), _)| *run == run_id)
            .map(|((_, task), value)| (task.clone(), value.clone()))
            .collect())
    }

    fn max_run_id(&self) -> Result<Option<RunId>> {
        let map = self.map.read().map_err(poisoned)?;
        Ok(map.keys().map(|(run, _)| *run).max())
    }
}
