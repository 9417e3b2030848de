//! RetryIfFails: re-run the body until it stops failing.

use std::time::Duration;

use arbor_execution::{ReportNode, ReportNodeStatus};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::dispatcher::ATTEMPT_KIND;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::kind_mismatch;

/// Handler for [`NodeKind::RetryIfFails`].
///
/// Every attempt is a report node of its own below the retry node. The
/// status is the status of the last attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryHandler;

#[async_trait]
impl NodeHandler for RetryHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::RetryIfFails(params) = &node.kind else {
            return Err(kind_mismatch("retry", node));
        };
        let max_retries = ctx.eval_or(params.max_retries.as_ref(), 2, |c, v| c.eval_u64(v, "maxRetries"))?;
        let grace = ctx.eval_or(params.grace_period.as_ref(), Duration::ZERO, |c, v| {
            c.eval_millis(v, "gracePeriod")
        })?;
        let timeout = params
            .timeout
            .as_ref()
            .map(|v| ctx.eval_millis(v, "timeout"))
            .transpose()?;

        let started = Instant::now();
        let mut attempt = 0_u64;
        let status = loop {
            attempt += 1;
            let status = ctx
                .dispatcher()
                .execute_body(ctx, node, report.id, format!("Attempt {attempt}"), ATTEMPT_KIND)
                .await
                .status;

            if !status.is_failure() || attempt > max_retries {
                break status;
            }
            if ctx.is_aborted() || ctx.has_returned() {
                break status;
            }
            if timeout.is_some_and(|t| started.elapsed() >= t) {
                tracing::debug!(attempt, "retry timeout elapsed");
                break status;
            }
            if !grace.is_zero() && !ctx.sleep(grace).await {
                break status;
            }
            tracing::debug!(attempt, status = %status, "retrying");
        };

        report.set_attribute("attempts", attempt);
        Ok(status)
    }
}
