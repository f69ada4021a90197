// src/dag/builder.rs

//! Incremental graph construction and validation.

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::graph::{Dag, Edge};
use crate::dag::task_info::TaskSpec;
use crate::errors::{DagflowError, Result};
use crate::types::{BranchLabel, TaskId};

/// Collects tasks and edges, then freezes them into an immutable [`Dag`].
///
/// Fan-out and fan-in need no special structure: they are just several edges
/// from or to the same task.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: String,
    tasks: BTreeMap<TaskId, TaskSpec>,
    /// Insertion order of task ids; keeps topological order stable.
    insertion: Vec<TaskId>,
    edges: Vec<Edge>,
    end: Option<TaskId>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a task. Fails with `DuplicateTask` if the id is taken.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<&mut Self> {
        if self.tasks.contains_key(&spec.id) {
            return Err(DagflowError::DuplicateTask(spec.id));
        }
        debug!(task = %spec.id, kind = %spec.kind, "registered task");
        self.insertion.push(spec.id.clone());
        self.tasks.insert(spec.id.clone(), spec);
        Ok(self)
    }

    /// Add a dependency edge `from -> to`.
    ///
    /// `label` must be set for edges leaving a branch task and unset
    /// otherwise; that is checked by [`GraphBuilder::freeze`] since the
    /// source task's kind is what matters.
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        label: Option<BranchLabel>,
    ) -> Result<&mut Self> {
        self.ensure_known(from)?;
        self.ensure_known(to)?;
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            label,
        });
        Ok(self)
    }

    /// Add an edge out of a branch task, active only when the branch picks
    /// `label`.
    ///
    /// A task hangs off a branch under exactly one label: a second edge from
    /// the same branch task to the same child, whatever its label, is
    /// rejected by [`GraphBuilder::freeze`]. Route several labels to one
    /// task through a join instead.
    pub fn add_branch_edge(
        &mut self,
        from: &str,
        to: &str,
        label: impl Into<BranchLabel>,
    ) -> Result<&mut Self> {
        self.add_edge(from, to, Some(label.into()))
    }

    /// `a >> b >> c`.
    pub fn chain(&mut self, tasks: &[&str]) -> Result<&mut Self> {
        for pair in tasks.windows(2) {
            self.add_edge(pair[0], pair[1], None)?;
        }
        Ok(self)
    }

    /// `a >> [b, c]`.
    pub fn fan_out(&mut self, from: &str, to: &[&str]) -> Result<&mut Self> {
        for t in to {
            self.add_edge(from, t, None)?;
        }
        Ok(self)
    }

    /// `[a, b] >> c`.
    pub fn fan_in(&mut self, from: &[&str], to: &str) -> Result<&mut Self> {
        for f in from {
            self.add_edge(f, to, None)?;
        }
        Ok(self)
    }

    /// Declare the task whose outcome decides the run's overall status.
    pub fn set_end(&mut self, task: &str) -> Result<&mut Self> {
        self.ensure_known(task)?;
        self.end = Some(task.to_string());
        Ok(self)
    }

    /// Validate and produce the immutable DAG.
    ///
    /// Checks, in order: duplicate edges, cycles, branch edge labelling,
    /// declared reads.
    pub fn freeze(self) -> Result<Dag> {
        self.check_duplicate_edges()?;
        let order = self.topological_order()?;
        self.check_branch_edges()?;
        self.check_reads()?;

        debug!(
            dag = %self.name,
            tasks = self.tasks.len(),
            edges = self.edges.len(),
            "froze DAG"
        );

        Ok(Dag::from_parts(
            self.name,
            self.tasks,
            self.edges,
            order,
            self.end,
        ))
    }

    fn ensure_known(&self, task: &str) -> Result<()> {
        if self.tasks.contains_key(task) {
            Ok(())
        } else {
            Err(DagflowError::UnknownTask(task.to_string()))
        }
    }

    fn check_duplicate_edges(&self) -> Result<()> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for edge in &self.edges {
            if !seen.insert((edge.from.as_str(), edge.to.as_str())) {
                let hint = if edge.label.is_some() {
                    " (a branch child takes a single label)"
                } else {
                    ""
                };
                return Err(DagflowError::InvalidGraph(format!(
                    "duplicate edge '{}' -> '{}'{hint}",
                    edge.from, edge.to
                )));
            }
        }
        Ok(())
    }

    fn topological_order(&self) -> Result<Vec<TaskId>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in &self.insertion {
            graph.add_node(name.as_str());
        }
        for edge in &self.edges {
            graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
        }

        // A topological sort fails on any cycle, self-loops included.
        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => Err(DagflowError::CycleDetected(cycle.node_id().to_string())),
        }
    }

    fn check_branch_edges(&self) -> Result<()> {
        for edge in &self.edges {
            let is_branch = self
                .tasks
                .get(&edge.from)
                .map(|t| t.kind.is_branch())
                .unwrap_or(false);

            match (is_branch, &edge.label) {
                (true, None) => {
                    return Err(DagflowError::InvalidGraph(format!(
                        "edge '{}' -> '{}' leaves branch task '{}' without a label",
                        edge.from, edge.to, edge.from
                    )));
                }
                (false, Some(label)) => {
                    return Err(DagflowError::InvalidGraph(format!(
                        "edge '{}' -> '{}' has label '{}' but '{}' is not a branch task",
                        edge.from, edge.to, label, edge.from
                    )));
                }
                _ => {}
            }
        }

        for spec in self.tasks.values().filter(|t| t.kind.is_branch()) {
            if !self.edges.iter().any(|e| e.from == spec.id) {
                return Err(DagflowError::InvalidGraph(format!(
                    "branch task '{}' has no outgoing edges",
                    spec.id
                )));
            }
        }

        Ok(())
    }

    fn check_reads(&self) -> Result<()> {
        for spec in self.tasks.values() {
            if spec.reads.is_empty() {
                continue;
            }
            let ancestors = self.ancestors_of(&spec.id);
            for read in &spec.reads {
                if !self.tasks.contains_key(read) {
                    return Err(DagflowError::UnknownTask(read.clone()));
                }
                if !ancestors.contains(read.as_str()) {
                    return Err(DagflowError::UndeclaredRead {
                        task: spec.id.clone(),
                        upstream: read.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn ancestors_of(&self, task: &str) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![task];

        while let Some(name) = stack.pop() {
            for edge in self.edges.iter().filter(|e| e.to == name) {
                if seen.insert(edge.from.as_str()) {
                    stack.push(edge.from.as_str());
                }
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::callable::empty_task;
    use crate::types::TriggerRule;

    fn task(id: &str) -> TaskSpec {
        TaskSpec::new(id, empty_task())
    }

    #[test]
    fn rejects_duplicate_task() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("a")).unwrap();
        let err = b.add_task(task("a")).unwrap_err();
        assert!(matches!(err, DagflowError::DuplicateTask(id) if id == "a"));
    }

    #[test]
    fn rejects_edge_to_unknown_task() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("a")).unwrap();
        let err = b.add_edge("a", "ghost", None).unwrap_err();
        assert!(matches!(err, DagflowError::UnknownTask(id) if id == "ghost"));
    }

    #[test]
    fn detects_cycle_on_freeze() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("a")).unwrap();
        b.add_task(task("b")).unwrap();
        b.add_task(task("c")).unwrap();
        b.chain(&["a", "b", "c", "a"]).unwrap();
        let err = b.freeze().unwrap_err();
        assert!(matches!(err, DagflowError::CycleDetected(_)));
    }

    #[test]
    fn detects_self_loop() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("a")).unwrap();
        b.add_edge("a", "a", None).unwrap();
        assert!(matches!(
            b.freeze().unwrap_err(),
            DagflowError::CycleDetected(id) if id == "a"
        ));
    }

    #[test]
    fn branch_edges_must_be_labelled() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("choose").branch()).unwrap();
        b.add_task(task("x")).unwrap();
        b.add_edge("choose", "x", None).unwrap();
        assert!(matches!(b.freeze().unwrap_err(), DagflowError::InvalidGraph(_)));
    }

    #[test]
    fn branch_child_takes_a_single_label() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("choose").branch()).unwrap();
        b.add_task(task("x")).unwrap();
        b.add_branch_edge("choose", "x", "yes").unwrap();
        b.add_branch_edge("choose", "x", "maybe").unwrap();
        match b.freeze().unwrap_err() {
            DagflowError::InvalidGraph(msg) => assert!(msg.contains("single label"), "{msg}"),
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn labels_only_leave_branch_tasks() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("a")).unwrap();
        b.add_task(task("x")).unwrap();
        b.add_branch_edge("a", "x", "yes").unwrap();
        assert!(matches!(b.freeze().unwrap_err(), DagflowError::InvalidGraph(_)));
    }

    #[test]
    fn reads_must_come_from_ancestors() {
        let mut b = GraphBuilder::new("t");
        b.add_task(task("a")).unwrap();
        b.add_task(task("b")).unwrap();
        b.add_task(task("c").reads("b")).unwrap();
        b.chain(&["a", "c"]).unwrap();
        match b.freeze().unwrap_err() {
            DagflowError::UndeclaredRead { task, upstream } => {
                assert_eq!(task, "c");
                assert_eq!(upstream, "b");
            }
            other => panic!("expected UndeclaredRead, got {other:?}"),
        }
    }

    #[test]
    fn freezes_fan_out_and_fan_in() {
        let mut b = GraphBuilder::new("t");
        for id in ["start", "left", "right"] {
            b.add_task(task(id)).unwrap();
        }
        b.add_task(task("end").join(TriggerRule::AllSuccess).reads("start"))
            .unwrap();
        b.fan_out("start", &["left", "right"])
            .unwrap()
            .fan_in(&["left", "right"], "end")
            .unwrap()
            .set_end("end")
            .unwrap();

        let dag = b.freeze().unwrap();
        assert_eq!(dag.roots(), vec!["start"]);
        assert_eq!(dag.end_task(), Some("end"));
        assert_eq!(dag.topological_order().first().map(String::as_str), Some("start"));
        assert_eq!(dag.topological_order().last().map(String::as_str), Some("end"));
        assert_eq!(dag.dependencies_of("end").len(), 2);
        assert_eq!(dag.edges().count(), 4);
    }
}
