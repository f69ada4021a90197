// tests/cancel_behaviour.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;

use dagflow::dag::{Dag, GraphBuilder, TaskSpec, TaskState};
use dagflow::engine::{Engine, RunOptions, RunStatus};
use dagflow::exec::callable::{TaskCallable, TaskOutput, task_fn};
use dagflow::exec::context::RunConfig;
use dagflow_test_utils::callables::value_task;
use dagflow_test_utils::{init_tracing, with_timeout};

/// Sleeps far longer than any test; sets `finished` if it ever completes.
fn slow_task(finished: Arc<AtomicBool>) -> Arc<dyn TaskCallable> {
    task_fn(move |_ctx| {
        let finished = Arc::clone(&finished);
        async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            finished.store(true, Ordering::SeqCst);
            anyhow::Ok(TaskOutput::none())
        }
    })
}

fn slow_chain(finished: Arc<AtomicBool>) -> Arc<Dag> {
    let mut g = GraphBuilder::new("slow");
    g.add_task(TaskSpec::new("quick", value_task(json!("done"))))
        .unwrap();
    g.add_task(TaskSpec::new("slow", slow_task(finished))).unwrap();
    g.add_task(TaskSpec::new("after", value_task(json!(1)))).unwrap();
    g.chain(&["quick", "slow", "after"]).unwrap();
    Arc::new(g.freeze().unwrap())
}

#[tokio::test]
async fn cancel_skips_running_and_pending_tasks() {
    init_tracing();
    let finished = Arc::new(AtomicBool::new(false));
    let dag = slow_chain(Arc::clone(&finished));
    let engine = Engine::in_memory(RunOptions::default());

    let handle = engine.start(&dag, RunConfig::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel().await;

    let result = with_timeout(handle.wait()).await.unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.state_of("quick"), Some(TaskState::Success));
    assert_eq!(result.state_of("slow"), Some(TaskState::Skipped));
    assert_eq!(result.state_of("after"), Some(TaskState::Skipped));
    assert_eq!(result.result_of("quick"), Some(&json!("done")));
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn canceller_outlives_the_run() {
    init_tracing();
    let mut g = GraphBuilder::new("fast");
    g.add_task(TaskSpec::new("only", value_task(json!(true))))
        .unwrap();
    let dag = Arc::new(g.freeze().unwrap());
    let engine = Engine::in_memory(RunOptions::default());

    let handle = engine.start(&dag, RunConfig::new()).unwrap();
    let canceller = handle.canceller();
    let result = with_timeout(handle.wait()).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);

    // The run is gone; cancelling is a no-op.
    with_timeout(canceller.cancel()).await;
}

#[tokio::test]
async fn cancelled_run_does_not_block_the_next_one() {
    init_tracing();
    let finished = Arc::new(AtomicBool::new(false));
    let dag = slow_chain(Arc::clone(&finished));
    let engine = Engine::in_memory(RunOptions { max_parallel: 1 });

    let handle = engine.start(&dag, RunConfig::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel().await;
    let cancelled = with_timeout(handle.wait()).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let mut g = GraphBuilder::new("next");
    g.add_task(TaskSpec::new("only", value_task(json!(2)))).unwrap();
    let next = with_timeout(engine.run(&Arc::new(g.freeze().unwrap()), RunConfig::new()))
        .await
        .unwrap();
    assert_eq!(next.run_id, cancelled.run_id + 1);
    assert!(next.is_success());
}
