// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::retry::{Backoff, RetryPolicy};
use crate::types::{BackoffKind, ResultStorageMode, TriggerRule};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// max_parallel = 4
/// default_retries = 2
/// end = "end"
///
/// [params]
/// bucket_name = "my-bucket"
///
/// [task.train]
/// cmd = "python train.py --bucket {{ params.bucket_name }}"
/// after = ["data_quality"]
/// ```
///
/// This is the raw deserialised form; use [`ConfigFile`] (obtained through
/// `TryFrom`) everywhere else.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Run parameters from `[params]`. Scalars of any TOML type are accepted
    /// and turned into strings during validation.
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Only constructed via `TryFrom<RawConfigFile>`, so a `ConfigFile` always
/// references known tasks, has a sane `[config]` section and an acyclic
/// task graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub params: BTreeMap<String, String>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        params: BTreeMap<String, String>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            config,
            params,
            task,
        }
    }

    /// Effective retry policy for `task`.
    pub fn retry_policy_for(&self, task: &TaskConfig) -> RetryPolicy {
        RetryPolicy::retries(task.retries.unwrap_or(self.config.default_retries))
            .with_backoff(self.config.backoff())
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Name of the DAG, used in logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of tasks running at the same time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Retries for tasks that do not set `retries` themselves.
    #[serde(default)]
    pub default_retries: u32,

    /// `"none"`, `"fixed"`, `"linear"` or `"exponential"`.
    #[serde(default)]
    pub retry_backoff: BackoffKind,

    /// Base delay for the backoff, in milliseconds.
    #[serde(default)]
    pub retry_delay_ms: u64,

    /// Upper bound for exponential backoff, in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// `"memory"` (default) or `"file"`.
    #[serde(default)]
    pub result_storage: ResultStorageMode,

    /// Task whose final state decides the run's status.
    #[serde(default)]
    pub end: Option<String>,
}

fn default_name() -> String {
    "dagflow".to_string()
}

fn default_max_parallel() -> usize {
    4
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_parallel: default_max_parallel(),
            default_retries: 0,
            retry_backoff: BackoffKind::default(),
            retry_delay_ms: 0,
            retry_max_delay_ms: default_retry_max_delay_ms(),
            result_storage: ResultStorageMode::default(),
            end: None,
        }
    }
}

impl ConfigSection {
    pub fn backoff(&self) -> Backoff {
        let delay = Duration::from_millis(self.retry_delay_ms);
        match self.retry_backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed(delay),
            BackoffKind::Linear => Backoff::Linear(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                base: delay,
                max: Duration::from_millis(self.retry_max_delay_ms),
            },
        }
    }
}

/// Kind of a task as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKindConfig {
    #[default]
    Normal,
    Branch,
    Join,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// The shell command to execute. `{{ params.KEY }}` is substituted.
    pub cmd: String,

    /// Dependency list: this task waits for the tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Upstream results this task reads (exported as `DAGFLOW_INPUT_<TASK>`).
    #[serde(default)]
    pub reads: Vec<String>,

    /// Retries after the first attempt; falls back to
    /// `[config].default_retries`.
    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub kind: TaskKindConfig,

    /// Join policy; required for (and only allowed on) `kind = "join"`.
    #[serde(default)]
    pub trigger_rule: Option<TriggerRule>,

    /// Label on the edges from branch tasks in `after` to this task.
    #[serde(default)]
    pub branch: Option<String>,
}
