//! Keyword and sub-plan calls.

use std::collections::BTreeMap;

use arbor_execution::{ErrorKind, NodeError, ReportNode, ReportNodeStatus, StatusComposer};
use arbor_plan::{CallFunctionParams, CallPlanParams, NodeKind, PlanNode};
use arbor_ports::{FunctionInput, FunctionOutput, FunctionRef, PortsError};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::kind_mismatch;
use crate::handlers::sequence::{fold, run_sequence};

/// Variable holding the payload of the last call, in the caller's frame.
pub const PREVIOUS: &str = "previous";
/// Variable holding the call payload, for the call's children.
pub const OUTPUT: &str = "output";
/// Variable holding the call report summary, for the call's children.
pub const CALL_REPORT: &str = "callReport";
/// Variable holding the sub-plan input inside a `CallPlan`.
pub const INPUT: &str = "input";

/// Handler for [`NodeKind::CallFunction`].
///
/// Reserves a token, invokes the keyword and always releases the token.
/// Children run afterwards with `output` and `callReport` bound, which is
/// where `Assert` nodes live.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallFunctionHandler;

#[async_trait]
impl NodeHandler for CallFunctionHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::CallFunction(params) = &node.kind else {
            return Err(kind_mismatch("call function", node));
        };
        let function = ctx.eval_string(&params.function, "function")?;
        if node.name().is_none() {
            report.name.clone_from(&function);
        }
        let arguments = match &params.arguments {
            Some(arguments) => ctx.evaluate(arguments)?,
            None => json!({}),
        };
        report.input = Some(arguments.clone());

        let own = if ctx.config().simulate {
            tracing::debug!(function = %function, "simulating call");
            report.output = Some(json!({}));
            ReportNodeStatus::Passed
        } else {
            match call(ctx, params, &function, arguments).await {
                Ok(output) => record(ctx, report, output),
                Err(err) => {
                    tracing::warn!(function = %function, error = %err, "call failed");
                    report.fail(NodeError::technical(err.to_string()).with_details(json!({
                        "function": function,
                        "retryable": err.is_retryable(),
                    })));
                    ReportNodeStatus::TechnicalError
                }
            }
        };
        report.status = own;

        let view = ctx.child();
        view.scope()
            .set(OUTPUT, report.output.clone().unwrap_or(Value::Null));
        view.scope().set(CALL_REPORT, report.summary());
        let mut composer = run_sequence(&view, &node.children, report.id, true).await;
        composer.set_own(own);
        Ok(composer.finish())
    }
}

/// Reserve, invoke under the optional timeout, release.
async fn call(
    ctx: &ExecutionContext,
    params: &CallFunctionParams,
    function: &str,
    arguments: Value,
) -> Result<FunctionOutput, EngineError> {
    let timeout = params
        .timeout
        .as_ref()
        .map(|v| ctx.eval_millis(v, "timeout"))
        .transpose()?;
    let mut interests = BTreeMap::new();
    for (attribute, pattern) in &params.selection_criteria {
        interests.insert(attribute.clone(), ctx.eval_string(pattern, attribute)?);
    }
    let attributes = BTreeMap::from([("run".to_owned(), ctx.run_id().to_string())]);

    let functions = &ctx.services().functions;
    let token = functions.reserve(attributes, interests).await?;
    let input = FunctionInput {
        payload: arguments,
        properties: BTreeMap::new(),
    };
    let function_ref = FunctionRef::new(function);
    let invocation = functions.invoke(&token, &function_ref, input);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, invocation)
            .await
            .unwrap_or_else(|_| Err(PortsError::timeout(format!("call {function}"), limit))),
        None => invocation.await,
    };

    if let Err(err) = functions.release(token).await {
        tracing::warn!(function, error = %err, "failed to release token");
    }
    Ok(result?)
}

/// Copy the call output onto the report node and return the own status.
fn record(ctx: &ExecutionContext, report: &mut ReportNode, output: FunctionOutput) -> ReportNodeStatus {
    let FunctionOutput {
        payload,
        error,
        attachments,
        measures,
    } = output;
    report.attachments.extend(attachments);
    report.measures.extend(measures);
    ctx.scope().set(PREVIOUS, payload.clone());
    report.output = Some(payload);

    match error {
        None => ReportNodeStatus::Passed,
        Some(error) => {
            let mut node_error = match error.kind {
                ErrorKind::Business => NodeError::business(error.message),
                ErrorKind::Technical => NodeError::technical(error.message),
            };
            if let Some(details) = error.details {
                node_error = node_error.with_details(details);
            }
            let status = node_error.status();
            report.fail(node_error);
            status
        }
    }
}

/// Handler for [`NodeKind::CallPlan`].
///
/// The sub-plan runs as a unit of its own: a fresh frame with `input`
/// bound, and its `Return` becomes the call output.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallPlanHandler;

#[async_trait]
impl NodeHandler for CallPlanHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::CallPlan(params) = &node.kind else {
            return Err(kind_mismatch("call plan", node));
        };
        let plan = resolve(ctx, params).await?;
        let input = match &params.input {
            Some(input) => ctx.evaluate(input)?,
            None => Value::Null,
        };
        report.input = Some(input.clone());
        report.set_attribute("plan", plan.id.to_string());

        let unit = ctx.new_unit();
        unit.scope().set(INPUT, input);
        let child = unit.run_child(&plan, report.id).await;
        report.output = unit.returned();

        let mut composer = StatusComposer::new();
        fold(&mut composer, child.status);
        Ok(composer.finish())
    }

    async fn create_skeleton(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &ReportNode,
    ) -> Result<(), EngineError> {
        let NodeKind::CallPlan(params) = &node.kind else {
            return Err(kind_mismatch("call plan", node));
        };
        match resolve(ctx, params).await {
            Ok(plan) => {
                ctx.dispatcher()
                    .create_skeleton(ctx, &plan, Some(report.id))
                    .await?;
            }
            Err(err) => tracing::debug!(error = %err, "sub-plan not resolved for skeleton"),
        }
        Ok(())
    }
}

async fn resolve(ctx: &ExecutionContext, params: &CallPlanParams) -> Result<PlanNode, EngineError> {
    let plans = &ctx.services().plans;
    if let Some(id) = params.plan_id {
        return plans
            .get(id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(id.to_string()));
    }
    let Some(name) = &params.plan_name else {
        return Err(EngineError::invalid_parameter(
            "planId",
            "either planId or planName is required",
        ));
    };
    let name = ctx.eval_string(name, "planName")?;
    plans
        .find_by_name(&name)
        .await?
        .ok_or(EngineError::PlanNotFound(name))
}
