use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical task identifier used throughout the crate.
pub type TaskId = String;

/// Identifier of one execution of a DAG.
///
/// Run ids are allocated by the [`crate::engine::Engine`] from a
/// monotonically increasing counter.
pub type RunId = u64;

/// Label carried by an edge leaving a branch task.
///
/// A branch task's callable returns one of these; only outgoing edges with a
/// matching label stay active for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchLabel(String);

impl BranchLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BranchLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BranchLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Policy deciding when a task with several upstream tasks may run.
///
/// Upstream states are read over incoming edges; an edge pruned by a branch
/// decision counts as a `skipped` upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Every upstream task succeeded.
    AllSuccess,
    /// Every upstream task is terminal and none failed.
    NoneFailed,
    /// Every upstream task is terminal, none failed, and at least one
    /// succeeded.
    NoneFailedOrSkipped,
    /// At least one upstream task succeeded.
    OneSuccess,
}

impl Default for TriggerRule {
    fn default() -> Self {
        TriggerRule::AllSuccess
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerRule::AllSuccess => "all_success",
            TriggerRule::NoneFailed => "none_failed",
            TriggerRule::NoneFailedOrSkipped => "none_failed_or_skipped",
            TriggerRule::OneSuccess => "one_success",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all_success" => Ok(TriggerRule::AllSuccess),
            "none_failed" => Ok(TriggerRule::NoneFailed),
            "none_failed_or_skipped" => Ok(TriggerRule::NoneFailedOrSkipped),
            "one_success" => Ok(TriggerRule::OneSuccess),
            other => Err(format!(
                "invalid trigger_rule: {other} (expected \"all_success\", \"none_failed\", \
                 \"none_failed_or_skipped\" or \"one_success\")"
            )),
        }
    }
}

/// Where task results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStorageMode {
    /// Keep results in memory only (lost on restart).
    Memory,
    /// Append results to a log file (`.dagflow/results.log`).
    File,
}

impl Default for ResultStorageMode {
    fn default() -> Self {
        ResultStorageMode::Memory
    }
}

/// Backoff flavour for retries, as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    None,
    Fixed,
    Linear,
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_rule_parses_and_displays() {
        let rule: TriggerRule = "None_Failed_Or_Skipped".parse().unwrap();
        assert_eq!(rule, TriggerRule::NoneFailedOrSkipped);
        assert_eq!(rule.to_string(), "none_failed_or_skipped");
        assert!("sometimes".parse::<TriggerRule>().is_err());
    }
}
