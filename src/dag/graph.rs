// src/dag/graph.rs

use std::collections::{BTreeMap, HashSet};

use crate::dag::task_info::TaskSpec;
use crate::errors::{DagflowError, Result};
use crate::types::{BranchLabel, TaskId};

/// Dependency edge `from -> to`, optionally labelled when `from` is a branch
/// task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
    pub label: Option<BranchLabel>,
}

/// Internal node structure: the task plus its incoming and outgoing edges.
#[derive(Debug, Clone)]
struct DagNode {
    spec: TaskSpec,
    upstream: Vec<Edge>,
    downstream: Vec<Edge>,
}

/// Immutable, validated task graph.
///
/// Only [`crate::dag::GraphBuilder::freeze`] constructs one, so every `Dag`
/// is known to be acyclic with all edge endpoints registered.
#[derive(Debug, Clone)]
pub struct Dag {
    name: String,
    nodes: BTreeMap<TaskId, DagNode>,
    order: Vec<TaskId>,
    end: Option<TaskId>,
}

impl Dag {
    /// Assemble a DAG from parts the builder has already validated.
    pub(crate) fn from_parts(
        name: String,
        tasks: BTreeMap<TaskId, TaskSpec>,
        edges: Vec<Edge>,
        order: Vec<TaskId>,
        end: Option<TaskId>,
    ) -> Self {
        let mut nodes: BTreeMap<TaskId, DagNode> = tasks
            .into_iter()
            .map(|(id, spec)| {
                (
                    id,
                    DagNode {
                        spec,
                        upstream: Vec::new(),
                        downstream: Vec::new(),
                    },
                )
            })
            .collect();

        for edge in edges {
            if let Some(node) = nodes.get_mut(&edge.from) {
                node.downstream.push(edge.clone());
            }
            if let Some(node) = nodes.get_mut(&edge.to) {
                node.upstream.push(edge);
            }
        }

        Self {
            name,
            nodes,
            order,
            end,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, task: &str) -> bool {
        self.nodes.contains_key(task)
    }

    /// All task ids, in topological order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn task(&self, task: &str) -> Option<&TaskSpec> {
        self.nodes.get(task).map(|n| &n.spec)
    }

    /// Incoming edges of a task.
    pub fn upstream_edges(&self, task: &str) -> &[Edge] {
        self.nodes
            .get(task)
            .map(|n| n.upstream.as_slice())
            .unwrap_or(&[])
    }

    /// Outgoing edges of a task.
    pub fn downstream_edges(&self, task: &str) -> &[Edge] {
        self.nodes
            .get(task)
            .map(|n| n.downstream.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate upstream task ids.
    pub fn dependencies_of(&self, task: &str) -> Vec<&str> {
        self.upstream_edges(task)
            .iter()
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Immediate downstream task ids.
    pub fn dependents_of(&self, task: &str) -> Vec<&str> {
        self.downstream_edges(task)
            .iter()
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Every edge in the graph, grouped by source in topological order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.order
            .iter()
            .flat_map(move |id| self.downstream_edges(id).iter())
    }

    /// Tasks without upstream dependencies.
    pub fn roots(&self) -> Vec<&str> {
        self.tasks()
            .filter(|t| self.upstream_edges(t).is_empty())
            .collect()
    }

    /// The declared end task, if any.
    pub fn end_task(&self) -> Option<&str> {
        self.end.as_deref()
    }

    /// Labels on the outgoing edges of `task`.
    pub fn branch_labels(&self, task: &str) -> Vec<&BranchLabel> {
        let mut labels: Vec<&BranchLabel> = self
            .downstream_edges(task)
            .iter()
            .filter_map(|e| e.label.as_ref())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Check that `label` names at least one outgoing edge of branch task
    /// `task`.
    pub fn validate_branch_label(&self, task: &str, label: &BranchLabel) -> Result<()> {
        let known = self
            .downstream_edges(task)
            .iter()
            .any(|e| e.label.as_ref() == Some(label));
        if known {
            Ok(())
        } else {
            Err(DagflowError::InvalidBranchLabel {
                task: task.to_string(),
                label: label.to_string(),
            })
        }
    }

    /// All tasks from which `task` is reachable.
    pub fn ancestors_of(&self, task: &str) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.dependencies_of(task);

        while let Some(name) = stack.pop() {
            if seen.insert(name) {
                stack.extend(self.dependencies_of(name));
            }
        }

        seen
    }
}
