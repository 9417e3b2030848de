//! Node dispatcher.
//!
//! The dispatcher owns the per-node protocol: persist the report node as
//! running, notify hooks, honour abort and skip, run the handler with panics
//! contained, finalize status and duration, persist again, notify hooks.
//! Handlers call back into it for their children, so recursion goes through
//! boxed futures.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arbor_core::ReportNodeId;
use arbor_execution::{NodeError, ReportNode, ReportNodeStatus};
use arbor_plan::PlanNode;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::Instrument;

use crate::context::{ExecutionContext, report_name};
use crate::error::EngineError;
use crate::handlers::sequence::run_sequence;
use crate::registry::HandlerRegistry;

/// Kind recorded on loop iteration report nodes.
pub const ITERATION_KIND: &str = "iteration";

/// Kind recorded on retry attempt report nodes.
pub const ATTEMPT_KIND: &str = "attempt";

/// Resolves node kinds to handlers and runs them.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    /// A dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// The handler registry.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Execute `node` with the freshly created `report` and return it
    /// finalized.
    ///
    /// Never fails: handler errors and panics become a technical error on
    /// the returned report node.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a PlanNode,
        mut report: ReportNode,
    ) -> BoxFuture<'a, ReportNode> {
        let span = tracing::debug_span!(
            "node",
            kind = %node.kind.tag(),
            name = %report.name,
            report_id = %report.id,
        );
        async move {
            let started = Instant::now();
            begin(ctx, node, &report).await;

            let status = if ctx.is_aborted() {
                ReportNodeStatus::Interrupted
            } else {
                match self.invoke(ctx, node, &mut report).await {
                    Ok(status) => status,
                    Err(err) => {
                        tracing::warn!(error = %err, "node handler failed");
                        report.fail(NodeError::technical(err.to_string()));
                        ReportNodeStatus::TechnicalError
                    }
                }
            };

            report.finish(status, started.elapsed());
            end(ctx, node, &report).await;
            report
        }
        .instrument(span)
        .boxed()
    }

    /// Run `children` as one synthetic unit below `parent`: a loop iteration
    /// or a retry attempt.
    ///
    /// The unit gets its own report node of kind `kind`, attributed to
    /// `owner`, and is aggregated like a sequence that continues on error.
    pub fn execute_body<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        owner: &'a PlanNode,
        parent: ReportNodeId,
        name: String,
        kind: &'static str,
    ) -> BoxFuture<'a, ReportNode> {
        let span = tracing::debug_span!("body", kind, name = %name);
        async move {
            let started = Instant::now();
            let mut report = ReportNode::new(ctx.run_id(), Some(parent), owner.id, name, kind);
            begin(ctx, owner, &report).await;

            let status = if ctx.is_aborted() {
                ReportNodeStatus::Interrupted
            } else {
                run_sequence(ctx, &owner.children, report.id, true)
                    .await
                    .finish()
            };

            report.finish(status, started.elapsed());
            end(ctx, owner, &report).await;
            report
        }
        .instrument(span)
        .boxed()
    }

    /// Build and persist the `NoRun` report subtree for `node`.
    pub fn create_skeleton<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a PlanNode,
        parent: Option<ReportNodeId>,
    ) -> BoxFuture<'a, Result<ReportNode, EngineError>> {
        async move {
            let report = ReportNode::skeleton(
                ctx.run_id(),
                parent,
                node.id,
                report_name(node),
                node.kind.tag(),
            );
            ctx.services().reports.save(&report).await?;
            let handler = self.registry.get(node.kind.tag())?;
            handler.create_skeleton(ctx, node, &report).await?;
            Ok(report)
        }
        .boxed()
    }

    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        if let Some(skip) = &node.skip
            && ctx.eval_bool(skip, "skip")?
        {
            return Ok(ReportNodeStatus::Skipped);
        }
        let handler = self.registry.get(node.kind.tag())?;
        match AssertUnwindSafe(handler.execute(ctx, node, report))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(EngineError::from_panic(&*payload)),
        }
    }
}

async fn begin(ctx: &ExecutionContext, node: &PlanNode, report: &ReportNode) {
    save(ctx, report).await;
    ctx.hooks().before_node(ctx, node, report).await;
}

async fn end(ctx: &ExecutionContext, node: &PlanNode, report: &ReportNode) {
    tracing::debug!(status = %report.status, "node finished");
    save(ctx, report).await;
    ctx.hooks().after_node(ctx, node, report).await;
}

async fn save(ctx: &ExecutionContext, report: &ReportNode) {
    if let Err(err) = ctx.services().reports.save(report).await {
        tracing::warn!(report_id = %report.id, error = %err, "failed to persist report node");
    }
}
