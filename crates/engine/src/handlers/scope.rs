//! Variable scoping: Session, Set, Select and Return.

use arbor_execution::{ReportNode, ReportNodeStatus};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::kind_mismatch;
use crate::handlers::sequence::run_sequence;

/// Handler for [`NodeKind::Session`].
///
/// Children run in a fresh frame, so bindings made inside are dropped when
/// the session ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionHandler;

#[async_trait]
impl NodeHandler for SessionHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let session = ctx.child();
        Ok(run_sequence(&session, &node.children, report.id, true)
            .await
            .finish())
    }
}

/// Handler for [`NodeKind::Set`]: bind a variable in the innermost frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetHandler;

#[async_trait]
impl NodeHandler for SetHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Set(params) = &node.kind else {
            return Err(kind_mismatch("set", node));
        };
        let key = ctx.eval_string(&params.key, "key")?;
        let value = ctx.evaluate(&params.value)?;
        ctx.scope().set(key.clone(), value.clone());
        report.output = Some(single(key, value));
        Ok(ReportNodeStatus::Passed)
    }
}

/// Handler for [`NodeKind::Select`].
///
/// The value is evaluated once and bound for the children.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectHandler;

#[async_trait]
impl NodeHandler for SelectHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Select(params) = &node.kind else {
            return Err(kind_mismatch("select", node));
        };
        let value = ctx.evaluate(&params.value)?;
        ctx.scope().set(params.key.clone(), value.clone());
        report.output = Some(single(params.key.clone(), value));
        Ok(run_sequence(ctx, &node.children, report.id, true)
            .await
            .finish())
    }
}

/// Handler for [`NodeKind::Return`].
///
/// Publishes the output of the enclosing unit and stops its remaining
/// siblings. Only the first return of a unit counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReturnHandler;

#[async_trait]
impl NodeHandler for ReturnHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Return(params) = &node.kind else {
            return Err(kind_mismatch("return", node));
        };
        let output = ctx.evaluate(&params.output)?;
        if !ctx.set_return(output.clone()) {
            tracing::debug!("unit already returned, ignoring");
        }
        report.output = Some(output);
        Ok(ReportNodeStatus::Passed)
    }
}

fn single(key: String, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key, value);
    Value::Object(map)
}
