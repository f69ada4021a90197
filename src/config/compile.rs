// src/config/compile.rs

//! Turn a validated [`ConfigFile`] into a frozen [`Dag`] and a [`RunConfig`].

use std::sync::Arc;

use crate::config::model::{ConfigFile, TaskKindConfig};
use crate::dag::{Dag, GraphBuilder, TaskSpec};
use crate::errors::{DagflowError, Result};
use crate::exec::command::CommandTask;
use crate::exec::context::RunConfig;
use crate::types::BranchLabel;

/// Build the DAG described by `cfg`; every task runs its `cmd`.
pub fn build_dag(cfg: &ConfigFile) -> Result<Dag> {
    let mut builder = GraphBuilder::new(cfg.config.name.clone());

    for (name, task) in &cfg.task {
        let mut spec = TaskSpec::new(name.clone(), Arc::new(CommandTask::new(task.cmd.clone())))
            .retry(cfg.retry_policy_for(task));

        spec = match (task.kind, task.trigger_rule) {
            (TaskKindConfig::Branch, _) => spec.branch(),
            (TaskKindConfig::Join, Some(rule)) => spec.join(rule),
            (TaskKindConfig::Join, None) => {
                return Err(DagflowError::ConfigError(format!(
                    "join task '{name}' needs a `trigger_rule`"
                )));
            }
            (TaskKindConfig::Normal, _) => spec,
        };

        for read in &task.reads {
            spec = spec.reads(read.clone());
        }
        builder.add_task(spec)?;
    }

    for (name, task) in &cfg.task {
        for dep in &task.after {
            let from_branch = cfg
                .task
                .get(dep)
                .map(|t| t.kind == TaskKindConfig::Branch)
                .unwrap_or(false);
            let label = if from_branch {
                task.branch.as_deref().map(BranchLabel::from)
            } else {
                None
            };
            builder.add_edge(dep, name, label)?;
        }
    }

    if let Some(end) = &cfg.config.end {
        builder.set_end(end)?;
    }

    builder.freeze()
}

/// Resolve the run configuration: `[params]` overlaid with `overrides`.
pub fn run_config<I, K, V>(cfg: &ConfigFile, overrides: I) -> RunConfig
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    RunConfig::new()
        .merged_with(cfg.params.clone())
        .merged_with(overrides)
}
