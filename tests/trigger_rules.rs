// tests/trigger_rules.rs

use std::sync::Arc;

use serde_json::json;

use dagflow::dag::{Dag, GraphBuilder, TaskSpec, TaskState};
use dagflow::engine::{Engine, RunOptions, RunResult, RunStatus};
use dagflow::exec::context::RunConfig;
use dagflow::exec::empty_task;
use dagflow::types::TriggerRule;
use dagflow_test_utils::callables::{Recorder, branch_to, failing_task, value_task};
use dagflow_test_utils::{init_tracing, with_timeout};

async fn run(dag: Dag) -> RunResult {
    let engine = Engine::in_memory(RunOptions::default());
    with_timeout(engine.run(&Arc::new(dag), RunConfig::new()))
        .await
        .unwrap()
}

/// `a` and `b` feed the join `j`; `b` fails when `fail_b` is set.
fn fan_in(rule: TriggerRule, fail_b: bool) -> Dag {
    let mut g = GraphBuilder::new("fan_in");
    g.add_task(TaskSpec::new("a", value_task(json!(1)))).unwrap();
    let b = if fail_b {
        failing_task("b broke")
    } else {
        value_task(json!(2))
    };
    g.add_task(TaskSpec::new("b", b)).unwrap();
    g.add_task(TaskSpec::new("j", empty_task()).join(rule)).unwrap();
    g.fan_in(&["a", "b"], "j").unwrap();
    g.freeze().unwrap()
}

/// `pick` chooses `label` between `left` and `right`; both feed `j`.
fn branch_then_join(label: &str, rule: TriggerRule) -> Dag {
    let mut g = GraphBuilder::new("branch_join");
    g.add_task(TaskSpec::new("pick", branch_to(label)).branch())
        .unwrap();
    g.add_task(TaskSpec::new("left", value_task(json!("L"))))
        .unwrap();
    g.add_task(TaskSpec::new("right", value_task(json!("R"))))
        .unwrap();
    g.add_task(TaskSpec::new("j", empty_task()).join(rule)).unwrap();
    g.add_branch_edge("pick", "left", "left").unwrap();
    g.add_branch_edge("pick", "right", "right").unwrap();
    g.fan_in(&["left", "right"], "j").unwrap();
    g.freeze().unwrap()
}

#[tokio::test]
async fn all_success_skips_after_a_failure() {
    init_tracing();
    let result = run(fan_in(TriggerRule::AllSuccess, true)).await;

    assert_eq!(result.state_of("a"), Some(TaskState::Success));
    assert_eq!(result.state_of("b"), Some(TaskState::Failed));
    assert_eq!(result.state_of("j"), Some(TaskState::Skipped));
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error_of("b").unwrap().contains("b broke"));
}

#[tokio::test]
async fn one_success_runs_despite_a_failure() {
    init_tracing();
    let result = run(fan_in(TriggerRule::OneSuccess, true)).await;

    assert_eq!(result.state_of("j"), Some(TaskState::Success));
    // No end task: any failure fails the run.
    assert_eq!(result.status, RunStatus::Failed);
}

#[tokio::test]
async fn none_failed_skips_after_a_failure() {
    init_tracing();
    let result = run(fan_in(TriggerRule::NoneFailed, true)).await;
    assert_eq!(result.state_of("j"), Some(TaskState::Skipped));

    let result = run(fan_in(TriggerRule::NoneFailed, false)).await;
    assert_eq!(result.state_of("j"), Some(TaskState::Success));
    assert_eq!(result.status, RunStatus::Success);
}

#[tokio::test]
async fn branch_prunes_the_other_path() {
    init_tracing();
    for (label, taken, pruned) in [("left", "left", "right"), ("right", "right", "left")] {
        let result = run(branch_then_join(label, TriggerRule::NoneFailedOrSkipped)).await;

        assert_eq!(result.state_of(taken), Some(TaskState::Success));
        assert_eq!(result.state_of(pruned), Some(TaskState::Skipped));
        assert_eq!(result.state_of("j"), Some(TaskState::Success));
        assert_eq!(result.result_of("pick"), Some(&json!(label)));
        assert_eq!(result.status, RunStatus::Success);
    }
}

#[tokio::test]
async fn all_success_join_after_branch_is_skipped() {
    init_tracing();
    let result = run(branch_then_join("left", TriggerRule::AllSuccess)).await;

    assert_eq!(result.state_of("left"), Some(TaskState::Success));
    assert_eq!(result.state_of("j"), Some(TaskState::Skipped));
    // Skips are not failures.
    assert_eq!(result.status, RunStatus::Success);
}

#[tokio::test]
async fn none_failed_or_skipped_skips_when_nothing_succeeded() {
    init_tracing();
    let mut g = GraphBuilder::new("all_pruned");
    g.add_task(TaskSpec::new("pick", branch_to("done")).branch())
        .unwrap();
    g.add_task(TaskSpec::new("done", empty_task())).unwrap();
    g.add_task(TaskSpec::new("a", empty_task())).unwrap();
    g.add_task(TaskSpec::new("b", empty_task())).unwrap();
    g.add_task(TaskSpec::new("j", empty_task()).join(TriggerRule::NoneFailedOrSkipped))
        .unwrap();
    g.add_branch_edge("pick", "done", "done").unwrap();
    g.add_branch_edge("pick", "a", "a").unwrap();
    g.add_branch_edge("pick", "b", "b").unwrap();
    g.fan_in(&["a", "b"], "j").unwrap();

    let result = run(g.freeze().unwrap()).await;

    let mut skipped = result.tasks_in_state(TaskState::Skipped);
    skipped.sort();
    assert_eq!(skipped, vec!["a", "b", "j"]);
    assert_eq!(result.state_of("done"), Some(TaskState::Success));
}

#[tokio::test]
async fn end_task_decides_the_run_status() {
    init_tracing();
    let mut g = GraphBuilder::new("end_decides");
    g.add_task(TaskSpec::new("start", empty_task())).unwrap();
    g.add_task(TaskSpec::new("optional", failing_task("nope")))
        .unwrap();
    g.add_task(TaskSpec::new("end", empty_task()).join(TriggerRule::OneSuccess))
        .unwrap();
    g.fan_in(&["start", "optional"], "end").unwrap();
    g.set_end("end").unwrap();

    let result = run(g.freeze().unwrap()).await;

    assert_eq!(result.state_of("optional"), Some(TaskState::Failed));
    assert_eq!(result.state_of("end"), Some(TaskState::Success));
    assert_eq!(result.status, RunStatus::Success);
}

#[tokio::test]
async fn failure_propagates_through_a_chain() {
    init_tracing();
    let mut g = GraphBuilder::new("chain");
    g.add_task(TaskSpec::new("a", failing_task("a broke"))).unwrap();
    g.add_task(TaskSpec::new("b", empty_task())).unwrap();
    g.add_task(TaskSpec::new("c", empty_task())).unwrap();
    g.add_task(TaskSpec::new("side", value_task(json!("ok"))))
        .unwrap();
    g.chain(&["a", "b", "c"]).unwrap();

    let result = run(g.freeze().unwrap()).await;

    assert_eq!(result.tasks_in_state(TaskState::Skipped), vec!["b", "c"]);
    assert_eq!(result.state_of("side"), Some(TaskState::Success));
    assert!(result.result_of("a").is_none());
    assert_eq!(result.result_of("side"), Some(&json!("ok")));
}

#[tokio::test]
async fn every_task_runs_exactly_once_with_upstream_results() {
    init_tracing();
    let recorder = Recorder::new();
    let mut g = GraphBuilder::new("diamond");
    g.add_task(TaskSpec::new("root", value_task(json!({"rows": 10}))))
        .unwrap();
    g.add_task(TaskSpec::new("left", value_task(json!(1)))).unwrap();
    g.add_task(TaskSpec::new("right", value_task(json!(2)))).unwrap();
    g.add_task(
        TaskSpec::new("sink", recorder.callable())
            .reads("root")
            .reads("left")
            .reads("right")
            .args(json!({"mode": "sum"})),
    )
    .unwrap();
    g.fan_out("root", &["left", "right"]).unwrap();
    g.fan_in(&["left", "right"], "sink").unwrap();

    let engine = Engine::in_memory(RunOptions { max_parallel: 2 });
    let config = RunConfig::new().with_param("env", "test");
    let result = with_timeout(engine.run(&Arc::new(g.freeze().unwrap()), config))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Success);
    let contexts = recorder.contexts();
    assert_eq!(contexts.len(), 1);
    let ctx = &contexts[0];
    assert_eq!(ctx.run_id, result.run_id);
    assert_eq!(ctx.task_id, "sink");
    assert_eq!(ctx.attempt, 1);
    assert_eq!(ctx.input("root").unwrap(), &json!({"rows": 10}));
    assert_eq!(ctx.input_f64("left").unwrap(), 1.0);
    assert_eq!(ctx.input_f64("right").unwrap(), 2.0);
    assert_eq!(ctx.param("env"), Some("test"));
    assert_eq!(ctx.arg_str("mode"), Some("sum"));
}

#[tokio::test]
async fn runs_get_increasing_ids_and_separate_results() {
    init_tracing();
    let engine = Engine::in_memory(RunOptions::default());
    let dag = Arc::new(fan_in(TriggerRule::AllSuccess, false));

    let first = with_timeout(engine.run(&dag, RunConfig::new())).await.unwrap();
    let second = with_timeout(engine.run(&dag, RunConfig::new())).await.unwrap();

    assert_eq!(first.run_id, 1);
    assert_eq!(second.run_id, 2);
    let stored = engine.store().run_results(second.run_id).unwrap();
    assert_eq!(stored.get("a"), Some(&json!(1)));
    assert_eq!(stored.get("b"), Some(&json!(2)));
    assert!(first.finished_at >= first.started_at);
}
