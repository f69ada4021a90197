// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`builder`] assembles tasks and edges and validates them into a [`Dag`].
//! - [`graph`] holds the immutable, validated task graph.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready to run, skipped, or pruned by a branch.
//! - [`trigger`] evaluates trigger rules over upstream states.
//! - [`task_info`] provides task definitions, task states and the dispatch
//!   record handed to executors.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;
pub mod trigger;

pub use builder::GraphBuilder;
pub use graph::{Dag, Edge};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{ScheduledTask, TaskKind, TaskSpec, TaskState};
pub use trigger::Readiness;
