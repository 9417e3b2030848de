//! Sequential composites: Sequence, plain groups and Synchronized.

use std::time::Duration;

use arbor_core::ReportNodeId;
use arbor_execution::{ReportNode, ReportNodeStatus, StatusComposer};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::kind_mismatch;

/// Run `children` in order below `parent`.
///
/// `BeforeSequence` children run first and `AfterSequence` children last,
/// even when a main child failed. `BeforeThread` and `AfterThread` children
/// belong to the enclosing thread group and are not run here.
///
/// Once the run aborts, no further children are created and the result is
/// marked interrupted. `AfterSequence` children run in a teardown view, so
/// they still run. A `Return` in the current unit stops the walk.
pub(crate) async fn run_sequence(
    ctx: &ExecutionContext,
    children: &[PlanNode],
    parent: ReportNodeId,
    continue_on_error: bool,
) -> StatusComposer {
    let mut composer = StatusComposer::new();
    let before = children
        .iter()
        .filter(|c| matches!(c.kind, NodeKind::BeforeSequence));
    let main = children.iter().filter(|c| {
        !matches!(
            c.kind,
            NodeKind::BeforeSequence
                | NodeKind::AfterSequence
                | NodeKind::BeforeThread
                | NodeKind::AfterThread
        )
    });
    let after = children
        .iter()
        .filter(|c| matches!(c.kind, NodeKind::AfterSequence));

    for child in before.chain(main) {
        if !step(ctx, child, parent, &mut composer).await {
            break;
        }
        if !continue_on_error && composer.is_failing() {
            break;
        }
    }
    let teardown = ctx.teardown();
    for child in after {
        if !step(&teardown, child, parent, &mut composer).await {
            break;
        }
    }
    composer
}

/// Dispatch one child. Returns `false` when the walk must stop.
async fn step(
    ctx: &ExecutionContext,
    child: &PlanNode,
    parent: ReportNodeId,
    composer: &mut StatusComposer,
) -> bool {
    if ctx.has_returned() {
        return false;
    }
    if ctx.is_aborted() {
        composer.mark_interrupted();
        return true;
    }
    let report = ctx.run_child(child, parent).await;
    fold(composer, report.status);
    true
}

/// Fold a child status into `composer`, remembering interruptions.
pub(crate) fn fold(composer: &mut StatusComposer, status: ReportNodeStatus) {
    if status == ReportNodeStatus::Interrupted {
        composer.mark_interrupted();
    }
    composer.add(status);
}

/// Handler for [`NodeKind::Sequence`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceHandler;

#[async_trait]
impl NodeHandler for SequenceHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Sequence(params) = &node.kind else {
            return Err(kind_mismatch("sequence", node));
        };
        let continue_on_error = ctx.eval_bool(&params.continue_on_error, "continueOnError")?;
        let pacing = ctx.eval_or(params.pacing.as_ref(), Duration::ZERO, |c, v| {
            c.eval_millis(v, "pacing")
        })?;

        let started = Instant::now();
        let mut composer = run_sequence(ctx, &node.children, report.id, continue_on_error).await;
        if !pacing.is_zero() && !ctx.sleep_until(started + pacing).await {
            composer.mark_interrupted();
        }
        Ok(composer.finish())
    }
}

/// Runs children in order, continuing after failures.
///
/// Serves `TestCase`, `Case`, and the before/after groups.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupHandler;

#[async_trait]
impl NodeHandler for GroupHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        Ok(run_sequence(ctx, &node.children, report.id, true)
            .await
            .finish())
    }
}

/// Handler for [`NodeKind::Synchronized`].
///
/// Children run while holding a named mutex. Without a name the lock is
/// private to the node.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronizedHandler;

#[async_trait]
impl NodeHandler for SynchronizedHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Synchronized(params) = &node.kind else {
            return Err(kind_mismatch("synchronized", node));
        };
        let name = match &params.lock_name {
            Some(name) => ctx.eval_string(name, "lockName")?,
            None => node.id.to_string(),
        };
        report.set_attribute("lock", name.clone());

        let lock = ctx.lock(&name, params.global);
        let _guard = tokio::select! {
            guard = lock.lock() => guard,
            () = ctx.cancelled() => return Ok(ReportNodeStatus::Interrupted),
        };
        Ok(run_sequence(ctx, &node.children, report.id, true)
            .await
            .finish())
    }
}
