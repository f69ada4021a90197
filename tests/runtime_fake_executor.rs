// tests/runtime_fake_executor.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc;

use dagflow::config::{ConfigFile, build_dag};
use dagflow::dag::TaskState;
use dagflow::engine::{
    CoreRuntime, Engine, RunEvent, RunOptions, RunStatus, Runtime, TaskOutcome,
};
use dagflow::exec::callable::TaskOutput;
use dagflow::exec::context::RunConfig;
use dagflow::store::{MemoryResultStore, ResultStore};
use dagflow::types::TriggerRule;
use dagflow_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use dagflow_test_utils::fake_executor::FakeExecutor;
use dagflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Very simple chain: A -> B
fn simple_chain_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").build())
        .with_task("B", TaskConfigBuilder::new("echo B").after("A").build())
        .build()
}

/// pick -> {yes, no} -> end (join)
fn branching_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task("pick", TaskConfigBuilder::new("echo yes").branch_task().build())
        .with_task(
            "yes",
            TaskConfigBuilder::new("echo Y").after("pick").on_branch("yes").build(),
        )
        .with_task(
            "no",
            TaskConfigBuilder::new("echo N").after("pick").on_branch("no").build(),
        )
        .with_task(
            "end",
            TaskConfigBuilder::new("true")
                .after("yes")
                .after("no")
                .join(TriggerRule::NoneFailedOrSkipped)
                .build(),
        )
        .with_end("end")
        .build()
}

#[tokio::test]
async fn runtime_runs_chain_in_order() -> TestResult {
    init_tracing();
    let dag = Arc::new(build_dag(&simple_chain_config())?);

    let (tx, rx) = mpsc::channel::<RunEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    let store: Arc<dyn ResultStore> = Arc::new(MemoryResultStore::new());
    let core = CoreRuntime::new(dag, 1, Arc::clone(&store), Arc::new(RunConfig::new()));
    let runtime = Runtime::new(core, rx, executor);

    let result = with_timeout(runtime.run()).await?;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(*executed.lock().unwrap(), vec!["A", "B"]);
    assert_eq!(store.get(1, "A")?, json!(null));
    Ok(())
}

#[tokio::test]
async fn scripted_branch_outcome_prunes_other_path() -> TestResult {
    init_tracing();
    let dag = Arc::new(build_dag(&branching_config())?);
    let engine = Engine::in_memory(RunOptions::default());
    let executed = Arc::new(Mutex::new(Vec::new()));

    let exec = Arc::clone(&executed);
    let result = with_timeout(engine.run_with(&dag, RunConfig::new(), move |tx| {
        FakeExecutor::new(tx, exec).with_outcome(
            "pick",
            TaskOutcome::Success {
                output: TaskOutput::branch("no"),
                attempts: 1,
            },
        )
    }))
    .await?;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(*executed.lock().unwrap(), vec!["pick", "no", "end"]);
    assert_eq!(result.state_of("yes"), Some(TaskState::Skipped));
    assert_eq!(result.result_of("pick"), Some(&json!("no")));
    Ok(())
}

#[tokio::test]
async fn failed_upstream_never_reaches_the_executor() -> TestResult {
    init_tracing();
    let dag = Arc::new(build_dag(&simple_chain_config())?);
    let engine = Engine::in_memory(RunOptions::default());
    let executed = Arc::new(Mutex::new(Vec::new()));

    let exec = Arc::clone(&executed);
    let result = with_timeout(engine.run_with(&dag, RunConfig::new(), move |tx| {
        FakeExecutor::new(tx, exec).failing("A")
    }))
    .await?;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(*executed.lock().unwrap(), vec!["A"]);
    assert_eq!(result.error_of("A"), Some("A failed"));
    assert_eq!(result.state_of("B"), Some(TaskState::Skipped));
    Ok(())
}

#[tokio::test]
async fn core_ignores_duplicate_and_stray_completions() -> TestResult {
    init_tracing();
    let dag = Arc::new(build_dag(&simple_chain_config())?);
    let store: Arc<dyn ResultStore> = Arc::new(MemoryResultStore::new());
    let mut core = CoreRuntime::new(dag, 9, Arc::clone(&store), Arc::new(RunConfig::new()));

    core.start()?;
    let done = TaskOutcome::Success {
        output: TaskOutput::Value(json!("a")),
        attempts: 1,
    };

    // Completion for a task that was never dispatched.
    let step = core.step(RunEvent::TaskCompleted {
        task: "B".to_string(),
        outcome: done.clone(),
    })?;
    assert!(step.commands.is_empty());

    core.step(RunEvent::TaskCompleted {
        task: "A".to_string(),
        outcome: done.clone(),
    })?;
    // Second report for A: no new dispatch, no second write.
    let step = core.step(RunEvent::TaskCompleted {
        task: "A".to_string(),
        outcome: done,
    })?;
    assert!(step.commands.is_empty());
    assert_eq!(store.get(9, "A")?, json!("a"));
    assert_eq!(core.scheduler().state_of("B"), Some(TaskState::Running));
    Ok(())
}
