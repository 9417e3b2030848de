//! Concurrent composites: TestSet and TestScenario.

use std::sync::Arc;

use arbor_core::ReportNodeId;
use arbor_execution::{ReportNode, ReportNodeStatus, StatusComposer};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::{kind_mismatch, worker_count};
use crate::handlers::sequence::fold;

/// Run every child concurrently, at most `threads` at a time.
///
/// Each child gets a view with a private innermost frame. Children not yet
/// started when the run aborts are not created.
pub(crate) async fn run_parallel(
    ctx: &ExecutionContext,
    children: &[PlanNode],
    parent: ReportNodeId,
    threads: usize,
) -> StatusComposer {
    let permits = threads.min(children.len()).clamp(1, Semaphore::MAX_PERMITS);
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut join_set = JoinSet::new();
    for child in children {
        let task = ChildTask {
            ctx: ctx.child(),
            node: child.clone(),
            parent,
            semaphore: Arc::clone(&semaphore),
        };
        join_set.spawn(task.run());
    }

    let mut composer = StatusComposer::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Some(status)) => fold(&mut composer, status),
            Ok(None) => composer.mark_interrupted(),
            Err(join_err) => {
                tracing::error!(?join_err, "child task panicked");
                composer.add(ReportNodeStatus::TechnicalError);
            }
        }
    }
    composer
}

/// One child of a concurrent composite.
struct ChildTask {
    ctx: ExecutionContext,
    node: PlanNode,
    parent: ReportNodeId,
    semaphore: Arc<Semaphore>,
}

impl ChildTask {
    /// Returns `None` if the child was never started.
    async fn run(self) -> Option<ReportNodeStatus> {
        let Ok(_permit) = self.semaphore.acquire_owned().await else {
            return None;
        };
        if self.ctx.is_aborted() {
            return None;
        }
        Some(self.ctx.run_child(&self.node, self.parent).await.status)
    }
}

/// Handler for [`NodeKind::TestSet`]: children on `threads` workers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestSetHandler;

#[async_trait]
impl NodeHandler for TestSetHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::TestSet(params) = &node.kind else {
            return Err(kind_mismatch("test set", node));
        };
        let threads = ctx.eval_or(params.threads.as_ref(), 1, |c, v| c.eval_u64(v, "threads"))?;
        let threads = worker_count(ctx, threads)?;
        report.set_attribute("threads", threads);
        Ok(run_parallel(ctx, &node.children, report.id, threads)
            .await
            .finish())
    }
}

/// Handler for [`NodeKind::TestScenario`]: every child at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestScenarioHandler;

#[async_trait]
impl NodeHandler for TestScenarioHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        Ok(run_parallel(ctx, &node.children, report.id, node.children.len())
            .await
            .finish())
    }
}
