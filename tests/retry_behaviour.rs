// tests/retry_behaviour.rs

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use dagflow::dag::{Dag, GraphBuilder, TaskSpec, TaskState};
use dagflow::engine::{Engine, RunOptions, RunStatus};
use dagflow::exec::context::RunConfig;
use dagflow::exec::{Backoff, RetryPolicy, empty_task};
use dagflow_test_utils::callables::flaky_task;
use dagflow_test_utils::fake_executor::InlineExecutor;
use dagflow_test_utils::{init_tracing, with_timeout};

fn flaky_dag(failures: u32, policy: RetryPolicy) -> (Arc<Dag>, Arc<AtomicU32>) {
    let (callable, calls) = flaky_task(failures, json!("trained"));
    let mut g = GraphBuilder::new("flaky");
    g.add_task(TaskSpec::new("flaky", callable).retry(policy))
        .unwrap();
    g.add_task(TaskSpec::new("after", empty_task())).unwrap();
    g.chain(&["flaky", "after"]).unwrap();
    (Arc::new(g.freeze().unwrap()), calls)
}

#[tokio::test]
async fn succeeds_within_retry_budget() {
    init_tracing();
    let (dag, calls) = flaky_dag(2, RetryPolicy::retries(2));
    let engine = Engine::in_memory(RunOptions::default());

    let result = with_timeout(engine.run(&dag, RunConfig::new())).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.result_of("flaky"), Some(&json!("trained")));
    assert_eq!(result.state_of("after"), Some(TaskState::Success));
}

#[tokio::test]
async fn fails_after_exhausting_retries() {
    init_tracing();
    let (dag, calls) = flaky_dag(5, RetryPolicy::retries(2));
    let engine = Engine::in_memory(RunOptions::default());

    let result = with_timeout(engine.run(&dag, RunConfig::new())).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.state_of("flaky"), Some(TaskState::Failed));
    assert_eq!(result.state_of("after"), Some(TaskState::Skipped));
    assert!(result.error_of("flaky").unwrap().contains("transient failure #3"));
    assert!(engine.store().get(result.run_id, "flaky").is_err());
}

#[tokio::test]
async fn no_retries_means_a_single_attempt() {
    init_tracing();
    let (dag, calls) = flaky_dag(1, RetryPolicy::none());
    let engine = Engine::in_memory(RunOptions::default());

    let result = with_timeout(engine.run(&dag, RunConfig::new())).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.state_of("flaky"), Some(TaskState::Failed));
}

#[tokio::test]
async fn backoff_delays_reattempts() {
    init_tracing();
    let policy = RetryPolicy::retries(2).with_backoff(Backoff::Fixed(Duration::from_millis(40)));
    let (dag, calls) = flaky_dag(2, policy);
    let engine = Engine::in_memory(RunOptions::default());

    let started = Instant::now();
    let result = with_timeout(engine.run(&dag, RunConfig::new())).await.unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn inline_executor_reports_retries_to_the_run() {
    init_tracing();
    let (dag, calls) = flaky_dag(1, RetryPolicy::retries(1));
    let engine = Engine::in_memory(RunOptions::default());
    let executed = Arc::new(Mutex::new(Vec::new()));

    let exec = Arc::clone(&executed);
    let result = with_timeout(engine.run_with(&dag, RunConfig::new(), move |tx| {
        InlineExecutor::new(tx, exec)
    }))
    .await
    .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*executed.lock().unwrap(), vec!["flaky", "after"]);
}
