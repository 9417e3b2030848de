//! Loops, retries, polling and thread groups.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arbor_engine::EngineConfig;
use arbor_execution::ReportNodeStatus;
use arbor_plan::{
    DynamicValue, ForEachParams, ForParams, NodeKind, PlanNode, RetryParams, ThreadGroupParams,
};
use common::{FlakyHandler, Harness, outcome, record};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn sorted_ints(values: Vec<Value>) -> Vec<i64> {
    let mut ints: Vec<i64> = values.iter().filter_map(Value::as_i64).collect();
    ints.sort_unstable();
    ints
}

// ---------------------------------------------------------------------------
// For / ForEach
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn for_binds_each_value_of_a_half_open_range() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(0, 5)).with_child(record("counter"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), (0..5).map(|i| json!(i)).collect::<Vec<_>>());

    let root = h.node(result.root_report_id.unwrap());
    assert_eq!(root.attributes["count"], json!(5));
    let iterations = h.children(root.id);
    assert_eq!(iterations.len(), 5);
    assert_eq!(iterations[0].name, "Iteration 1");
    assert!(iterations.iter().all(|n| n.kind == "iteration"));
}

#[tokio::test(start_paused = true)]
async fn empty_range_passes_without_iterations() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(0, 0)).with_child(record("counter"));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Passed);
    assert!(h.children(result.root_report_id.unwrap()).is_empty());
    assert!(h.record.values().is_empty());
}

#[tokio::test(start_paused = true)]
async fn counter_name_and_step_are_configurable() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(10, 0).with_inc(-4).with_counter("i"))
        .with_child(record("i"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!(10), json!(6), json!(2)]);
}

#[tokio::test(start_paused = true)]
async fn max_failed_loops_stops_scheduling() {
    let h = Harness::new();
    let body = PlanNode::if_block(DynamicValue::expression("counter % 2 == 1")).with_child(outcome("failed"));
    let plan = PlanNode::for_range(ForParams::range(0, 10).with_max_failed_loops(3)).with_child(body);

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    let root = h.node(result.root_report_id.unwrap());
    // Failures at 1, 3 and 5; nothing after the sixth iteration.
    assert_eq!(root.attributes["count"], json!(6));
    assert_eq!(root.attributes["errorCount"], json!(3));
}

#[tokio::test(start_paused = true)]
async fn for_each_stops_after_max_failed_rows() {
    let h = Harness::new();
    let rows: Vec<Value> = (1..=10).map(|n| json!([n])).collect();
    let config = json!({"headers": ["n"], "rows": rows});
    let body = PlanNode::if_block(DynamicValue::expression("row.n % 2 == 0")).with_child(outcome("failed"));
    let plan = PlanNode::for_each(ForEachParams::new("inline", config).with_max_failed_loops(3)).with_child(body);

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    let root = h.node(result.root_report_id.unwrap());
    // Rows 2, 4 and 6 fail; row 7 is never read.
    assert_eq!(root.attributes["count"], json!(6));
    assert_eq!(root.attributes["errorCount"], json!(3));
    assert_eq!(h.pools.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_loop_honours_max_failed_loops() {
    let h = Harness::new();
    let body = [
        PlanNode::sleep(10),
        PlanNode::if_block(DynamicValue::expression("counter % 2 == 1")).with_child(outcome("failed")),
    ];
    let params = ForParams::range(0, 20).with_parallel(2).with_max_failed_loops(3);
    let plan = PlanNode::for_range(params).with_children(body);

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    let root = h.node(result.root_report_id.unwrap());
    let count = root.attributes["count"].as_u64().unwrap();
    let failed = root.attributes["errorCount"].as_u64().unwrap();
    assert!(failed >= 3, "{failed}");
    // At most one iteration per other worker was already in flight.
    assert!((6..=7).contains(&count), "{count}");
}

#[tokio::test(start_paused = true)]
async fn parallel_threads_above_the_limit_are_rejected() {
    let config = EngineConfig::default().with_max_threads(8);
    let h = Harness::with(|b| b.config(config));
    let plan = PlanNode::for_range(ForParams::range(0, 4).with_parallel(9)).with_child(record("counter"));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::TechnicalError);
    assert!(h.record.values().is_empty());
    let root = h.node(result.root_report_id.unwrap());
    assert!(root.error.unwrap().message.contains("threads"));
}

#[tokio::test(start_paused = true)]
async fn parallel_workers_never_outnumber_iterations() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(0, 3).with_parallel(1000))
        .with_children([PlanNode::sleep(10), record("userId")]);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(sorted_ints(h.record.values()), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn max_loops_caps_an_unbounded_range() {
    let h = Harness::new();
    let mut params = ForParams::range(0, 0).with_max_loops(4);
    params.end = None;
    let plan = PlanNode::for_range(params).with_child(record("counter"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn break_stops_the_loop() {
    let h = Harness::new();
    let body = [
        record("counter"),
        PlanNode::if_block(DynamicValue::expression("counter == 2")).with_child(PlanNode::set("break", true)),
    ];
    let plan = PlanNode::for_range(ForParams::range(0, 10)).with_children(body);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test(start_paused = true)]
async fn for_each_walks_rows_and_closes_the_pool() {
    let h = Harness::new();
    let config = json!({
        "headers": ["name", "qty"],
        "rows": [["apple", 3], ["pear", 5]],
    });
    let plan = PlanNode::for_each(ForEachParams::new("inline", config)).with_child(record("row.name"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!("apple"), json!("pear")]);
    assert_eq!(h.pools.opened(), 1);
    assert_eq!(h.pools.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn for_each_closes_the_pool_when_stopped_early() {
    let h = Harness::new();
    let config = json!({"rows": [1, 2, 3, 4, 5, 6]});
    let params = ForEachParams::new("inline", config)
        .with_item("n")
        .with_max_failed_loops(1);
    let plan = PlanNode::for_each(params).with_child(outcome("failed"));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    assert_eq!(h.children(result.root_report_id.unwrap()).len(), 1);
    assert_eq!(h.pools.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_pool_kind_is_a_technical_error() {
    let h = Harness::new();
    let plan = PlanNode::for_each(ForEachParams::new("nowhere", json!({}))).with_child(record("row"));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::TechnicalError);
    assert!(h.record.values().is_empty());
}

#[tokio::test(start_paused = true)]
async fn parallel_iterations_share_the_range() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(0, 20).with_parallel(4))
        .with_children([PlanNode::sleep(10), record("counter")]);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(sorted_ints(h.record.values()), (0..20).collect::<Vec<_>>());
    assert!(result.duration < Duration::from_millis(200), "{:?}", result.duration);
}

#[tokio::test(start_paused = true)]
async fn parallel_iterations_have_private_frames() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(0, 12).with_parallel(4)).with_children([
        PlanNode::set("mine", DynamicValue::expression("counter")),
        PlanNode::sleep(5),
        record("mine == counter"),
    ]);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    let values = h.record.values();
    assert_eq!(values.len(), 12);
    assert!(values.iter().all(|v| *v == json!(true)), "{values:?}");
}

// ---------------------------------------------------------------------------
// RetryIfFails
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn retry_until_the_body_passes() {
    let flaky = Arc::new(FlakyHandler::new(2));
    let handler = flaky.clone();
    let h = Harness::with(move |b| b.handler("flaky", handler));
    let plan = PlanNode::retry_if_fails(RetryParams::new(2, 10))
        .with_child(PlanNode::custom("flaky", json!(null)));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(flaky.calls(), 3);
    let root = h.node(result.root_report_id.unwrap());
    assert_eq!(root.attributes["attempts"], json!(3));
    let attempts: Vec<_> = h
        .children(root.id)
        .into_iter()
        .map(|n| (n.name, n.status))
        .collect();
    assert_eq!(
        attempts,
        vec![
            ("Attempt 1".to_owned(), ReportNodeStatus::Failed),
            ("Attempt 2".to_owned(), ReportNodeStatus::Failed),
            ("Attempt 3".to_owned(), ReportNodeStatus::Passed),
        ]
    );
    assert!(result.duration >= Duration::from_millis(20));
}

#[tokio::test(start_paused = true)]
async fn grace_period_separates_attempts_only() {
    let flaky = Arc::new(FlakyHandler::new(10));
    let handler = flaky.clone();
    let h = Harness::with(move |b| b.handler("flaky", handler));
    let plan = PlanNode::retry_if_fails(RetryParams::new(2, 50))
        .with_child(PlanNode::custom("flaky", json!(null)));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    assert_eq!(flaky.calls(), 3);
    // Attempts start at 0, 50 and 100 ms; no wait follows the last one.
    assert!(result.duration >= Duration::from_millis(100), "{:?}", result.duration);
    assert!(result.duration < Duration::from_millis(150), "{:?}", result.duration);
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_after_max_retries() {
    let flaky = Arc::new(FlakyHandler::new(10));
    let handler = flaky.clone();
    let h = Harness::with(move |b| b.handler("flaky", handler));
    let plan = PlanNode::retry_if_fails(RetryParams::new(1, 0))
        .with_child(PlanNode::custom("flaky", json!(null)));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_timeout_prevents_new_attempts() {
    let flaky = Arc::new(FlakyHandler::new(10));
    let handler = flaky.clone();
    let h = Harness::with(move |b| b.handler("flaky", handler));
    let plan = PlanNode::retry_if_fails(RetryParams::new(10, 0).with_timeout(25))
        .with_children([PlanNode::sleep(10), PlanNode::custom("flaky", json!(null))]);

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    // Attempts end at 10, 20 and 30 ms; the timeout is seen after the third.
    assert_eq!(flaky.calls(), 3);
}

// ---------------------------------------------------------------------------
// WaitAndPoll
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn wait_and_poll_fails_at_the_timeout() {
    let h = Harness::new();
    let plan = PlanNode::wait_and_poll(DynamicValue::expression("false"), 10, Some(100));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::Failed);
    assert!(result.duration >= Duration::from_millis(100), "{:?}", result.duration);
    assert!(result.duration < Duration::from_millis(120), "{:?}", result.duration);
    let root = h.node(result.root_report_id.unwrap());
    assert_eq!(root.attributes["polls"], json!(11));
    assert!(root.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn wait_and_poll_passes_as_soon_as_the_condition_holds() {
    let h = Harness::new();
    let plan = PlanNode::wait_and_poll(DynamicValue::expression("ready"), 10, Some(100));

    let run = h.engine.prepare(plan);
    run.bind("ready", json!(true));
    let result = run.execute().await;

    assert!(result.is_success());
    assert_eq!(result.duration, Duration::ZERO);
}

// ---------------------------------------------------------------------------
// ThreadGroup
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn thread_group_runs_users_times_iterations() {
    let h = Harness::new();
    let plan = PlanNode::thread_group(ThreadGroupParams::new(3, 4)).with_child(record("gcounter"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(sorted_ints(h.record.values()), (1..=12).collect::<Vec<_>>());
    let group = h.node(result.root_report_id.unwrap());
    assert_eq!(group.attributes["threadsStarted"], json!(3));
    assert_eq!(group.attributes["threadsEnded"], json!(3));
    assert_eq!(h.children(group.id).len(), 12);
}

#[tokio::test(start_paused = true)]
async fn thread_setup_and_teardown_run_once_per_user() {
    let h = Harness::new();
    let plan = PlanNode::thread_group(ThreadGroupParams::new(2, 3)).with_children([
        PlanNode::new(NodeKind::BeforeThread).with_child(record("'setup ' + userId")),
        record("iteration"),
        PlanNode::new(NodeKind::AfterThread).with_child(record("'teardown ' + userId")),
    ]);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    let values = h.record.values();
    let count = |text: &str| values.iter().filter(|v| **v == json!(text)).count();
    assert_eq!(count("setup 1"), 1);
    assert_eq!(count("setup 2"), 1);
    assert_eq!(count("teardown 1"), 1);
    assert_eq!(count("teardown 2"), 1);
    assert_eq!(sorted_ints(values), vec![1, 1, 2, 2, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn thread_group_stops_at_max_duration() {
    let h = Harness::new();
    let params = ThreadGroupParams::new(2, 0)
        .with_pacing(100)
        .with_rampup(0)
        .with_max_duration(350);
    let plan = PlanNode::thread_group(params).with_child(record("iteration"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    // Iterations start at 0, 100, 200 and 300 ms for both users.
    assert_eq!(h.record.values().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn pacing_is_measured_from_iteration_start() {
    let h = Harness::new();
    let params = ThreadGroupParams::new(1, 3).with_pacing(100).with_rampup(0);
    let plan = PlanNode::thread_group(params).with_children([PlanNode::sleep(30), record("iteration")]);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!(1), json!(2), json!(3)]);
    // Iterations start at 0, 100 and 200 ms; the last one ends at 230 ms.
    assert!(result.duration >= Duration::from_millis(230), "{:?}", result.duration);
    assert!(result.duration < Duration::from_millis(260), "{:?}", result.duration);
}

#[tokio::test(start_paused = true)]
async fn no_pacing_after_the_last_iteration() {
    let h = Harness::new();
    let params = ThreadGroupParams::new(1, 2).with_pacing(10_000).with_rampup(0);
    let plan = PlanNode::thread_group(params).with_child(record("iteration"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!(1), json!(2)]);
    assert!(result.duration >= Duration::from_secs(10), "{:?}", result.duration);
    assert!(result.duration < Duration::from_secs(11), "{:?}", result.duration);
}

#[tokio::test(start_paused = true)]
async fn rampup_staggers_user_starts() {
    let h = Harness::new();
    let params = ThreadGroupParams::new(4, 1).with_rampup(400);
    let plan = PlanNode::thread_group(params).with_child(record("userId"));

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    // The last user starts at 300 ms.
    assert!(result.duration >= Duration::from_millis(300), "{:?}", result.duration);
    assert_eq!(h.record.values(), vec![json!(1), json!(2), json!(3), json!(4)]);
}

#[tokio::test(start_paused = true)]
async fn unbounded_thread_group_is_rejected() {
    let h = Harness::new();
    let plan = PlanNode::thread_group(ThreadGroupParams::new(1, 0)).with_child(record("userId"));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::TechnicalError);
    assert!(h.record.values().is_empty());
}
