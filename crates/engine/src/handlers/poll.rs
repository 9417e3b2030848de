//! WaitAndPoll: evaluate a condition until it holds.

use std::time::Duration;

use arbor_execution::{NodeError, ReportNode, ReportNodeStatus};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::kind_mismatch;

/// Delay between polls when none is configured.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// Handler for [`NodeKind::WaitAndPoll`].
///
/// Fails when the timeout or the iteration cap is reached first.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitAndPollHandler;

#[async_trait]
impl NodeHandler for WaitAndPollHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::WaitAndPoll(params) = &node.kind else {
            return Err(kind_mismatch("wait and poll", node));
        };
        let pacing = ctx.eval_or(params.pacing.as_ref(), DEFAULT_PACING, |c, v| c.eval_millis(v, "pacing"))?;
        let timeout = params
            .timeout
            .as_ref()
            .map(|v| ctx.eval_millis(v, "timeout"))
            .transpose()?;
        let max_iterations = params
            .max_iterations
            .as_ref()
            .map(|v| ctx.eval_u64(v, "maxIterations"))
            .transpose()?;

        let started = Instant::now();
        let mut polls = 0_u64;
        let status = loop {
            if ctx.is_aborted() {
                break ReportNodeStatus::Interrupted;
            }
            polls += 1;
            if ctx.eval_bool(&params.condition, "condition")? {
                break ReportNodeStatus::Passed;
            }

            let elapsed = started.elapsed();
            let timed_out = timeout.is_some_and(|t| elapsed >= t);
            if timed_out || max_iterations.is_some_and(|max| polls >= max) {
                report.fail(NodeError::business(format!(
                    "condition not met after {polls} polls"
                )));
                break ReportNodeStatus::Failed;
            }

            let wait = timeout.map_or(pacing, |t| pacing.min(t - elapsed));
            if !ctx.sleep(wait).await {
                break ReportNodeStatus::Interrupted;
            }
        };

        report.set_attribute("polls", polls);
        Ok(status)
    }
}
