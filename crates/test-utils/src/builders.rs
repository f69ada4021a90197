#![allow(dead_code)]

use std::collections::BTreeMap;

use dagflow::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig, TaskKindConfig};
use dagflow::types::TriggerRule;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                params: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.config
            .params
            .insert(key.to_string(), toml::Value::String(value.to_string()));
        self
    }

    pub fn with_end(mut self, task: &str) -> Self {
        self.config.config.end = Some(task.to_string());
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.config.config.default_retries = retries;
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.config.config.max_parallel = n;
        self
    }

    /// The raw config, for tests that exercise validation failures.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                reads: vec![],
                retries: None,
                kind: TaskKindConfig::Normal,
                trigger_rule: None,
                branch: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn reads(mut self, task: &str) -> Self {
        self.task.reads.push(task.to_string());
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.task.retries = Some(n);
        self
    }

    pub fn branch_task(mut self) -> Self {
        self.task.kind = TaskKindConfig::Branch;
        self
    }

    pub fn join(mut self, rule: TriggerRule) -> Self {
        self.task.kind = TaskKindConfig::Join;
        self.task.trigger_rule = Some(rule);
        self
    }

    /// Label on the edges coming from branch tasks in `after`.
    pub fn on_branch(mut self, label: &str) -> Self {
        self.task.branch = Some(label.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
