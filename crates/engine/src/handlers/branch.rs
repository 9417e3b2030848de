//! Conditional branching: If and Switch.

use arbor_execution::{ReportNode, ReportNodeStatus, StatusComposer};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::convert;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::kind_mismatch;
use crate::handlers::sequence::fold;

/// Handler for [`NodeKind::If`].
///
/// The first child is the `then` branch, the optional second child the
/// `else` branch.
#[derive(Debug, Default, Clone, Copy)]
pub struct IfHandler;

#[async_trait]
impl NodeHandler for IfHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::If(params) = &node.kind else {
            return Err(kind_mismatch("if", node));
        };
        let condition = ctx.eval_bool(&params.condition, "condition")?;
        report.set_attribute("condition", condition);

        let branch = if condition {
            node.children.first()
        } else {
            node.children.get(1)
        };
        let mut composer = StatusComposer::new();
        if let Some(branch) = branch {
            let child = ctx.run_child(branch, report.id).await;
            fold(&mut composer, child.status);
        }
        Ok(composer.finish())
    }
}

/// Handler for [`NodeKind::Switch`].
///
/// Dispatches the first `Case` child whose value equals the expression.
/// Other children are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwitchHandler;

#[async_trait]
impl NodeHandler for SwitchHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Switch(params) = &node.kind else {
            return Err(kind_mismatch("switch", node));
        };
        let value = ctx.evaluate(&params.expression)?;
        report.input = Some(value.clone());

        let mut matched = None;
        for child in &node.children {
            if let NodeKind::Case(case) = &child.kind
                && convert::loosely_equal(&ctx.evaluate(&case.value)?, &value)
            {
                matched = Some(child);
                break;
            }
        }

        let mut composer = StatusComposer::new();
        match matched {
            Some(case) => {
                let child = ctx.run_child(case, report.id).await;
                fold(&mut composer, child.status);
            }
            None => tracing::debug!(value = %value, "no case matched"),
        }
        Ok(composer.finish())
    }
}
