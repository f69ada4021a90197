// src/errors.rs

//! Crate-wide error type and aliases.
//!
//! Build-time variants (`DuplicateTask`, `UnknownTask`, `CycleDetected`,
//! `InvalidGraph`, `UndeclaredRead`) abort graph construction. Run-time
//! variants describe a single task or a single result-store access and are
//! surfaced in [`crate::engine::RunResult`] rather than aborting the run.

use thiserror::Error;

use crate::types::{RunId, TaskId};

#[derive(Error, Debug)]
pub enum DagflowError {
    #[error("Duplicate task: {0}")]
    DuplicateTask(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Cycle detected in DAG involving task '{0}'")]
    CycleDetected(TaskId),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Task '{task}' reads '{upstream}', which is not one of its upstream tasks")]
    UndeclaredRead { task: TaskId, upstream: TaskId },

    #[error("Task '{task}' failed after {attempts} attempt(s): {message}")]
    TaskExecution {
        task: TaskId,
        attempts: u32,
        message: String,
    },

    #[error("Branch task '{task}' returned label '{label}' with no matching outgoing edge")]
    InvalidBranchLabel { task: TaskId, label: String },

    #[error("Result for task '{task}' in run {run_id} already written")]
    DuplicateResult { run_id: RunId, task: TaskId },

    #[error("No result for task '{task}' in run {run_id}")]
    ResultNotFound { run_id: RunId, task: TaskId },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagflowError {
    /// Whether this error is raised while building a graph (as opposed to
    /// while running one).
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            DagflowError::DuplicateTask(_)
                | DagflowError::UnknownTask(_)
                | DagflowError::CycleDetected(_)
                | DagflowError::InvalidGraph(_)
                | DagflowError::UndeclaredRead { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagflowError>;
