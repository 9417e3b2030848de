//! The capability every node kind implements.

use arbor_execution::{ReportNode, ReportNodeStatus};
use arbor_plan::PlanNode;
use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::EngineError;

/// Executes one node kind.
///
/// Handlers are stateless and shared across runs; everything run-specific
/// arrives through the [`ExecutionContext`].
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute `node`, recording payloads and errors on `report`.
    ///
    /// Returns the node's status: its own outcome aggregated over the
    /// statuses of the children it dispatched. An `Err` is recorded on the
    /// report node as a technical error by the dispatcher.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError>;

    /// Build the `NoRun` report subtree below `report` without executing.
    ///
    /// The default contributes every child once.
    async fn create_skeleton(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &ReportNode,
    ) -> Result<(), EngineError> {
        for child in &node.children {
            ctx.dispatcher().create_skeleton(ctx, child, Some(report.id)).await?;
        }
        Ok(())
    }
}
