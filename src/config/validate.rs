// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, TaskKindConfig};
use crate::errors::{DagflowError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let params = stringify_params(&raw.params)?;
        Ok(ConfigFile::new_unchecked(raw.config, params, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_task_kinds(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(DagflowError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_parallel == 0 {
        return Err(DagflowError::ConfigError(
            "[config].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Some(end) = &cfg.config.end {
        if !cfg.task.contains_key(end) {
            return Err(DagflowError::ConfigError(format!(
                "[config].end refers to unknown task '{end}'"
            )));
        }
    }

    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(DagflowError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(DagflowError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
        for read in task.reads.iter() {
            if !cfg.task.contains_key(read) {
                return Err(DagflowError::ConfigError(format!(
                    "task '{}' reads unknown task '{}'",
                    name, read
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_kinds(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        match (task.kind, task.trigger_rule) {
            (TaskKindConfig::Join, None) => {
                return Err(DagflowError::ConfigError(format!(
                    "join task '{name}' needs a `trigger_rule`"
                )));
            }
            (TaskKindConfig::Normal | TaskKindConfig::Branch, Some(_)) => {
                return Err(DagflowError::ConfigError(format!(
                    "task '{name}' sets `trigger_rule` but is not a join task"
                )));
            }
            _ => {}
        }

        let after_branch = task.after.iter().any(|dep| {
            cfg.task
                .get(dep)
                .map(|t| t.kind == TaskKindConfig::Branch)
                .unwrap_or(false)
        });
        match (&task.branch, after_branch) {
            (Some(label), false) => {
                return Err(DagflowError::ConfigError(format!(
                    "task '{name}' sets `branch = \"{label}\"` but none of its `after` tasks is a branch task"
                )));
            }
            (None, true) => {
                return Err(DagflowError::ConfigError(format!(
                    "task '{name}' follows a branch task and needs a `branch` label"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task
    // For:
    //   [task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(DagflowError::CycleDetected(cycle.node_id().to_string())),
    }
}

fn stringify_params(raw: &BTreeMap<String, toml::Value>) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|(key, value)| {
            let s = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(DagflowError::ConfigError(format!(
                        "[params].{key} must be a string, number or boolean (got {})",
                        other.type_str()
                    )));
                }
            };
            Ok((key.clone(), s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn accepts_branching_pipeline() {
        let cfg = parse(
            r#"
            [config]
            end = "end"

            [params]
            rmse_threshold = 500
            vendor_name = "acme"

            [task.score]
            cmd = "echo 420"

            [task.pick]
            cmd = "echo deploy"
            kind = "branch"
            after = ["score"]
            reads = ["score"]

            [task.deploy]
            cmd = "true"
            after = ["pick"]
            branch = "deploy"

            [task.notify]
            cmd = "true"
            after = ["pick"]
            branch = "notify"

            [task.end]
            cmd = "true"
            kind = "join"
            trigger_rule = "none_failed_or_skipped"
            after = ["deploy", "notify"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.params["rmse_threshold"], "500");
        assert_eq!(cfg.config.max_parallel, 4);
        assert_eq!(cfg.task.len(), 5);
    }

    #[test]
    fn rejects_cycles_and_unknown_refs() {
        let err = parse(
            r#"
            [task.a]
            cmd = "true"
            after = ["b"]
            [task.b]
            cmd = "true"
            after = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DagflowError::CycleDetected(_)));

        let err = parse(
            r#"
            [task.a]
            cmd = "true"
            reads = ["ghost"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn join_needs_rule_and_branch_needs_label() {
        let err = parse(
            r#"
            [task.a]
            cmd = "true"
            kind = "join"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("trigger_rule"));

        let err = parse(
            r#"
            [task.a]
            cmd = "true"
            kind = "branch"
            [task.b]
            cmd = "true"
            after = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("branch"));
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = parse(
            r#"
            [config]
            max_parallel = 0
            [task.a]
            cmd = "true"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DagflowError::ConfigError(_)));
    }
}
