// src/exec/context.rs

//! Per-run configuration and the per-call context handed to task callables.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{DagflowError, Result};
use crate::types::{RunId, TaskId};

/// Configuration resolved once per run and passed to every task call.
///
/// Callables never look configuration up on their own; whatever they need
/// (bucket names, vendor names, thresholds) arrives through here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub params: BTreeMap<String, String>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for setting a single parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    /// Overlay `overrides` on top of the current params (later wins).
    pub fn merged_with<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in overrides {
            self.params.insert(k.into(), v.into());
        }
        self
    }
}

/// Everything a task callable gets to see for one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: RunId,
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub config: Arc<RunConfig>,
    /// Literal arguments attached to the task at build time.
    pub args: Value,
    /// Results of the task's declared reads that completed successfully.
    pub inputs: BTreeMap<TaskId, Value>,
}

impl TaskContext {
    /// Result of a declared upstream read.
    ///
    /// Returns `ResultNotFound` when the upstream did not succeed in this run
    /// (for example because it was skipped by a branch).
    pub fn input(&self, task: &str) -> Result<&Value> {
        self.inputs
            .get(task)
            .ok_or_else(|| DagflowError::ResultNotFound {
                run_id: self.run_id,
                task: task.to_string(),
            })
    }

    /// Upstream result interpreted as a floating point number.
    pub fn input_f64(&self, task: &str) -> Result<f64> {
        let value = self.input(task)?;
        value.as_f64().ok_or_else(|| {
            DagflowError::Other(anyhow::anyhow!(
                "result of '{task}' is not a number: {value}"
            ))
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.config.get(key)
    }

    /// Like [`TaskContext::param`], but a missing key is an error.
    pub fn require_param(&self, key: &str) -> Result<&str> {
        self.param(key).ok_or_else(|| {
            DagflowError::ConfigError(format!(
                "task '{}' needs run parameter '{key}'",
                self.task_id
            ))
        })
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Literal string argument.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}
