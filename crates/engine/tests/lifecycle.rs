//! Run lifecycle: import, abort, hooks, telemetry and skeletons.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arbor_engine::{AbortHandle, ExecutionContext, PluginHook, RunResult};
use arbor_execution::{ReportNode, ReportNodeStatus, RunStatus};
use arbor_plan::{ForParams, NodeKind, PlanNode, ThreadGroupParams};
use arbor_ports::FunctionOutput;
use arbor_telemetry::ExecutionEvent;
use async_trait::async_trait;
use common::{Harness, record};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

fn abort_after(handle: &AbortHandle, millis: u64) -> JoinHandle<bool> {
    let handle = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        handle.abort()
    })
}

fn statuses(nodes: &[ReportNode]) -> Vec<ReportNodeStatus> {
    nodes.iter().map(|n| n.status).collect()
}

fn sorted_ints(values: Vec<Value>) -> Vec<i64> {
    let mut ints: Vec<i64> = values.iter().filter_map(Value::as_i64).collect();
    ints.sort_unstable();
    ints
}

#[tokio::test(start_paused = true)]
async fn abort_interrupts_a_sleeping_run() {
    let h = Harness::new();
    let plan = PlanNode::sequence().with_children([PlanNode::sleep(10_000), record("'after'")]);
    let run = h.engine.prepare(plan);
    let handle = run.abort_handle();

    let aborter = tokio::spawn({
        let handle = handle.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abort()
        }
    });
    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert!(!handle.abort(), "second abort is a no-op");
    assert!(handle.is_aborted());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert!(result.was_interrupted());
    assert_eq!(result.run_status, RunStatus::Ended);
    assert!(result.duration < Duration::from_secs(1), "{:?}", result.duration);
    assert!(h.record.values().is_empty());

    let children = h.children(result.root_report_id.unwrap());
    assert_eq!(children[0].status, ReportNodeStatus::Interrupted);
}

#[tokio::test(start_paused = true)]
async fn abort_stops_keyword_calls_that_have_not_started() {
    let h = Harness::new();
    h.functions
        .register("Ping", |_| Ok(FunctionOutput::success(json!({}))));
    let plan = PlanNode::sequence().with_children([
        PlanNode::sleep(100),
        PlanNode::call_function("Ping"),
        PlanNode::call_function("Ping"),
        PlanNode::call_function("Ping"),
    ]);
    let run = h.engine.prepare(plan);
    let aborter = abort_after(&run.abort_handle(), 50);

    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert!(h.functions.calls().is_empty());
    assert_eq!(h.functions.reserved(), 0);
    let children = h.children(result.root_report_id.unwrap());
    assert_eq!(statuses(&children), vec![ReportNodeStatus::Interrupted]);
}

#[tokio::test(start_paused = true)]
async fn abort_lets_a_running_call_finish() {
    let h = Harness::new();
    h.functions.register_async("Slow", |_| {
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(FunctionOutput::success(json!({"done": true})))
        }
        .boxed()
    });
    h.functions
        .register("Ping", |_| Ok(FunctionOutput::success(json!({}))));
    let plan = PlanNode::sequence().with_children([
        PlanNode::call_function("Slow"),
        PlanNode::call_function("Ping"),
    ]);
    let run = h.engine.prepare(plan);
    let aborter = abort_after(&run.abort_handle(), 50);

    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert_eq!(h.functions.calls(), vec![("Slow".to_owned(), json!({}))]);
    assert_eq!(h.functions.outstanding(), 0);
    let children = h.children(result.root_report_id.unwrap());
    assert_eq!(statuses(&children), vec![ReportNodeStatus::Passed]);
    assert_eq!(children[0].output, Some(json!({"done": true})));
}

#[tokio::test(start_paused = true)]
async fn abort_still_runs_sequence_teardown() {
    let h = Harness::new();
    let plan = PlanNode::sequence().with_children([
        PlanNode::sleep(100),
        record("'main'"),
        PlanNode::new(NodeKind::AfterSequence).with_child(record("'cleanup'")),
    ]);
    let run = h.engine.prepare(plan);
    let aborter = abort_after(&run.abort_handle(), 50);

    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert_eq!(h.record.values(), vec![json!("cleanup")]);
    let children = h.children(result.root_report_id.unwrap());
    assert_eq!(
        statuses(&children),
        vec![ReportNodeStatus::Interrupted, ReportNodeStatus::Passed]
    );
}

#[tokio::test(start_paused = true)]
async fn abort_still_runs_thread_teardown() {
    let h = Harness::new();
    let params = ThreadGroupParams::new(1, 0)
        .with_pacing(100)
        .with_rampup(0)
        .with_max_duration(60_000);
    let plan = PlanNode::thread_group(params).with_children([
        record("iteration"),
        PlanNode::new(NodeKind::AfterThread).with_children([PlanNode::sleep(20), record("'teardown'")]),
    ]);
    let run = h.engine.prepare(plan);
    let aborter = abort_after(&run.abort_handle(), 250);

    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    // Iterations start at 0, 100 and 200 ms; the teardown sleep is not cut short.
    assert_eq!(
        h.record.values(),
        vec![json!(1), json!(2), json!(3), json!("teardown")]
    );
    assert!(result.duration >= Duration::from_millis(270), "{:?}", result.duration);
    let group = h.node(result.root_report_id.unwrap());
    assert_eq!(group.attributes["threadsEnded"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn abort_during_a_parallel_loop_starts_no_new_iterations() {
    let h = Harness::new();
    let plan = PlanNode::for_range(ForParams::range(0, 100).with_parallel(4))
        .with_children([record("counter"), PlanNode::sleep(100)]);
    let run = h.engine.prepare(plan);
    let aborter = abort_after(&run.abort_handle(), 150);

    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert!(result.duration < Duration::from_millis(200), "{:?}", result.duration);
    // Two rounds of four iterations started before the abort.
    assert_eq!(sorted_ints(h.record.values()), (0..8).collect::<Vec<_>>());
    let root = h.node(result.root_report_id.unwrap());
    assert_eq!(root.attributes["count"], json!(8));
    let iterations = h.children(root.id);
    assert_eq!(iterations.len(), 8);
    let interrupted = iterations
        .iter()
        .filter(|n| n.status == ReportNodeStatus::Interrupted)
        .count();
    assert_eq!(interrupted, 4);
}

#[tokio::test(start_paused = true)]
async fn abort_during_a_thread_group_winds_every_user_down() {
    let h = Harness::new();
    let params = ThreadGroupParams::new(3, 0)
        .with_pacing(100)
        .with_rampup(0)
        .with_max_duration(60_000);
    let plan = PlanNode::thread_group(params).with_child(record("gcounter"));
    let run = h.engine.prepare(plan);
    let aborter = abort_after(&run.abort_handle(), 150);

    let result = run.execute().await;

    assert!(aborter.await.unwrap());
    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert!(result.duration < Duration::from_millis(200), "{:?}", result.duration);
    assert_eq!(sorted_ints(h.record.values()), (1..=6).collect::<Vec<_>>());
    let group = h.node(result.root_report_id.unwrap());
    assert_eq!(group.attributes["threadsStarted"], json!(3));
    assert_eq!(group.attributes["threadsEnded"], json!(3));
}

#[tokio::test(start_paused = true)]
async fn abort_before_start_runs_nothing() {
    let h = Harness::new();
    let run = h.engine.prepare(PlanNode::sequence().with_child(record("'x'")));
    assert!(run.abort_handle().abort());

    let result = run.execute().await;

    assert_eq!(result.status, ReportNodeStatus::Interrupted);
    assert_eq!(result.run_status, RunStatus::Ended);
    assert!(h.record.values().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_plan_fails_at_import() {
    let h = Harness::new();
    let plan = PlanNode::sequence().with_child(PlanNode::case("orphan"));

    let result = h.engine.run(plan).await;

    assert_eq!(result.status, ReportNodeStatus::TechnicalError);
    assert_eq!(result.root_report_id, None);
    assert_eq!(result.run_status, RunStatus::Ended);
    let error = result.import_error.unwrap();
    assert!(error.contains("switch"), "{error}");
    assert!(h.reports.is_empty());
}

#[tokio::test(start_paused = true)]
async fn plan_is_loaded_by_id() {
    let h = Harness::new();
    let plan = PlanNode::sequence().with_child(record("'stored'"));
    let id = plan.id;
    h.plans.insert(plan);

    let result = h.engine.run(id).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!("stored")]);
}

#[tokio::test(start_paused = true)]
async fn unknown_plan_id_is_an_import_error() {
    let h = Harness::new();

    let result = h.engine.run(arbor_core::PlanNodeId::v4()).await;

    assert_eq!(result.status, ReportNodeStatus::TechnicalError);
    assert!(result.import_error.unwrap().contains("plan not found"));
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct UnrulyHook;

#[async_trait]
impl PluginHook for UnrulyHook {
    fn name(&self) -> &str {
        "unruly"
    }

    async fn on_run_start(&self, ctx: &ExecutionContext, _plan: &PlanNode) -> anyhow::Result<()> {
        ctx.scope().set("env", json!("qa"));
        Ok(())
    }

    async fn before_node(
        &self,
        _ctx: &ExecutionContext,
        _node: &PlanNode,
        _report: &ReportNode,
    ) -> anyhow::Result<()> {
        panic!("hook blew up");
    }

    async fn on_run_end(&self, _ctx: &ExecutionContext, _result: &RunResult) -> anyhow::Result<()> {
        anyhow::bail!("export refused")
    }
}

#[tokio::test(start_paused = true)]
async fn misbehaving_hooks_do_not_change_outcomes() {
    let h = Harness::with(|b| b.hook(Arc::new(UnrulyHook)));
    let plan = PlanNode::sequence().with_children([record("env"), record("'done'")]);

    let result = h.engine.run(plan).await;

    assert!(result.is_success());
    assert_eq!(h.record.values(), vec![json!("qa"), json!("done")]);
    // three panicking before_node calls plus the failed on_run_end
    assert_eq!(h.engine.hooks().failures(), 4);
    assert_eq!(h.engine.hooks().len(), 2);
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn telemetry_follows_the_run() {
    let h = Harness::new();
    let mut events = h.engine.events().subscribe();
    let plan = PlanNode::thread_group(ThreadGroupParams::new(2, 1))
        .with_child(PlanNode::check(arbor_plan::DynamicValue::expression("1 > 2")));

    let result = h.engine.run(plan).await;
    assert_eq!(result.status, ReportNodeStatus::Failed);

    let events = events.drain();
    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunEnded {
            run_status: RunStatus::Exporting,
            status: ReportNodeStatus::Failed,
            ..
        })
    ));
    let started = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ThreadStarted { .. }))
        .count();
    let ended = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ThreadEnded { .. }))
        .count();
    assert_eq!((started, ended), (2, 2));
    assert!(events.iter().all(|e| e.run_id() == result.run_id));

    let metrics = h.engine.metrics();
    assert_eq!(metrics.counter("runs_started_total").get(), 1);
    assert_eq!(metrics.counter("runs_ended_total").get(), 1);
    // group, two iterations, two checks
    assert_eq!(metrics.counter("nodes_finished_total").get(), 5);
    assert_eq!(metrics.counter("nodes_failed_total").get(), 5);
    assert_eq!(metrics.gauge("active_users").get(), 0);
    assert_eq!(metrics.histogram("node_duration_ms").count(), 5);
}

// ---------------------------------------------------------------------------
// Skeleton
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skeleton_mirrors_the_plan_without_running_it() {
    let h = Harness::new();
    let plan = PlanNode::sequence().with_name("suite").with_children([
        record("'a'"),
        PlanNode::new(NodeKind::TestCase).with_child(record("'b'")),
    ]);

    let root = h.engine.skeleton(plan).await.unwrap();

    assert_eq!(root.name, "suite");
    assert_eq!(root.status, ReportNodeStatus::NoRun);
    let children = h.children(root.id);
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.status == ReportNodeStatus::NoRun));
    assert_eq!(h.children(children[1].id).len(), 1);
    assert!(h.record.values().is_empty());
    assert_eq!(h.reports.len(), 4);
}

#[tokio::test]
async fn skeleton_rejects_invalid_plans() {
    let h = Harness::new();

    let err = h.engine.skeleton(PlanNode::case("orphan")).await.unwrap_err();

    assert!(matches!(err, arbor_engine::EngineError::InvalidPlan(_)), "{err}");
}
