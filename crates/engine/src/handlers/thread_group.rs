//! Load generation: ThreadGroup.
//!
//! Each virtual user is a task of its own. Users start on a ramp-up
//! schedule, run `BeforeThread` children once, iterate the body until the
//! iteration count or the group deadline is reached, then run `AfterThread`
//! children once, even when the run is aborting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arbor_execution::{ReportNode, ReportNodeStatus, StatusComposer};
use arbor_plan::{NodeKind, PlanNode, ThreadGroupParams};
use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::convert;
use crate::dispatcher::ITERATION_KIND;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::iteration::{BREAK, USER_ID};
use crate::handlers::kind_mismatch;
use crate::handlers::sequence::fold;

/// Variable holding the group-wide iteration counter.
pub const GCOUNTER: &str = "gcounter";
/// Variable holding the per-user iteration index.
pub const ITERATION: &str = "iteration";

/// Stand-in for instants too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + delay`, saturating instead of overflowing.
fn after(start: Instant, delay: Duration) -> Instant {
    start
        .checked_add(delay)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Resolved [`ThreadGroupParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupSettings {
    users: u64,
    /// 0 means unbounded.
    iterations: u64,
    rampup: Duration,
    pacing: Duration,
    start_offset: Duration,
    max_duration: Option<Duration>,
    pack: u64,
}

impl GroupSettings {
    fn resolve(ctx: &ExecutionContext, params: &ThreadGroupParams) -> Result<Self, EngineError> {
        let users = ctx.eval_or(params.users.as_ref(), 1, |c, v| c.eval_i64(v, "users"))?;
        if users <= 0 {
            return Err(EngineError::invalid_parameter("users", "must be positive"));
        }
        let pack = ctx.eval_or(params.pack.as_ref(), 1, |c, v| c.eval_i64(v, "pack"))?;
        if pack <= 0 {
            return Err(EngineError::invalid_parameter("pack", "must be positive"));
        }
        let iterations = ctx.eval_or(params.iterations.as_ref(), 1, |c, v| c.eval_u64(v, "iterations"))?;
        let max_duration = ctx.eval_or(params.max_duration.as_ref(), Duration::ZERO, |c, v| {
            c.eval_millis(v, "maxDuration")
        })?;
        if iterations == 0 && max_duration.is_zero() {
            return Err(EngineError::invalid_parameter(
                "iterations",
                "iterations and maxDuration cannot both be unbounded",
            ));
        }
        let pacing = ctx.eval_or(params.pacing.as_ref(), Duration::ZERO, |c, v| c.eval_millis(v, "pacing"))?;
        let rampup = ctx.eval_or(params.rampup.as_ref(), pacing, |c, v| c.eval_millis(v, "rampup"))?;
        let start_offset = ctx.eval_or(params.start_offset.as_ref(), Duration::ZERO, |c, v| {
            c.eval_millis(v, "startOffset")
        })?;

        Ok(Self {
            users: users.unsigned_abs(),
            iterations,
            rampup,
            pacing,
            start_offset,
            max_duration: (!max_duration.is_zero()).then_some(max_duration),
            pack: pack.unsigned_abs(),
        })
    }

    /// Delay from the group start until `user_id` (1-based) starts.
    fn start_delay(&self, user_id: u64) -> Duration {
        let slot = u128::from(self.pack * (user_id.saturating_sub(1) / self.pack));
        let spread = self.rampup.as_nanos().saturating_mul(slot) / u128::from(self.users);
        let spread = Duration::from_nanos(u64::try_from(spread).unwrap_or(u64::MAX));
        self.start_offset.saturating_add(spread)
    }

    /// Whether a user that completed `done` iterations may start another.
    const fn wants_more(&self, done: u64) -> bool {
        self.iterations == 0 || done < self.iterations
    }
}

#[derive(Debug, Default)]
struct GroupCounters {
    gcounter: AtomicU64,
    started: AtomicU64,
    ended: AtomicU64,
}

/// Handler for [`NodeKind::ThreadGroup`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadGroupHandler;

#[async_trait]
impl NodeHandler for ThreadGroupHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::ThreadGroup(params) = &node.kind else {
            return Err(kind_mismatch("thread group", node));
        };
        let settings = GroupSettings::resolve(ctx, params)?;
        report.input = Some(json!({
            "users": settings.users,
            "iterations": settings.iterations,
            "pacingMs": millis(settings.pacing),
            "rampupMs": millis(settings.rampup),
        }));

        let started = Instant::now();
        let deadline = settings.max_duration.map(|d| after(started, d));
        let node = Arc::new(node.clone());
        let group = Arc::new(report.clone());
        let counters = Arc::new(GroupCounters::default());

        let mut join_set = JoinSet::new();
        for user_id in 1..=settings.users {
            let user = VirtualUser {
                ctx: ctx.child(),
                node: Arc::clone(&node),
                group: Arc::clone(&group),
                counters: Arc::clone(&counters),
                settings,
                start: after(started, settings.start_delay(user_id)),
                deadline,
                user_id,
            };
            join_set.spawn(user.run());
        }

        let mut composer = StatusComposer::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(statuses) => statuses.into_iter().for_each(|s| fold(&mut composer, s)),
                Err(join_err) => {
                    tracing::error!(?join_err, "virtual user panicked");
                    composer.add(ReportNodeStatus::TechnicalError);
                }
            }
        }

        report.set_attribute("threadsStarted", counters.started.load(Ordering::Acquire));
        report.set_attribute("threadsEnded", counters.ended.load(Ordering::Acquire));
        if ctx.is_aborted() {
            composer.mark_interrupted();
        }
        Ok(composer.finish())
    }
}

struct VirtualUser {
    ctx: ExecutionContext,
    node: Arc<PlanNode>,
    group: Arc<ReportNode>,
    counters: Arc<GroupCounters>,
    settings: GroupSettings,
    start: Instant,
    deadline: Option<Instant>,
    user_id: u64,
}

impl VirtualUser {
    fn past_deadline(&self, at: Instant) -> bool {
        self.deadline.is_some_and(|deadline| at >= deadline)
    }

    fn may_iterate(&self, done: u64) -> bool {
        !self.ctx.is_aborted() && !self.ctx.has_returned() && self.settings.wants_more(done)
    }

    async fn run(self) -> Vec<ReportNodeStatus> {
        let mut statuses = Vec::new();
        if !self.ctx.sleep_until(self.start).await || self.past_deadline(Instant::now()) {
            return statuses;
        }

        self.counters.started.fetch_add(1, Ordering::AcqRel);
        self.ctx
            .hooks()
            .thread_started(&self.ctx, &self.group, self.user_id)
            .await;
        self.ctx.scope().set(USER_ID, json!(self.user_id));
        tracing::debug!(user_id = self.user_id, "virtual user started");

        self.run_setup(&self.ctx, NodeKind::BeforeThread, &mut statuses)
            .await;

        let mut iteration = 0;
        while self.may_iterate(iteration) {
            let iteration_start = Instant::now();
            if self.past_deadline(iteration_start) {
                break;
            }
            iteration += 1;
            let gcounter = self.counters.gcounter.fetch_add(1, Ordering::AcqRel) + 1;

            let view = self.ctx.child();
            view.scope().set(GCOUNTER, json!(gcounter));
            view.scope().set(ITERATION, json!(iteration));
            let report = self
                .ctx
                .dispatcher()
                .execute_body(
                    &view,
                    &self.node,
                    self.group.id,
                    format!("Iteration {gcounter}"),
                    ITERATION_KIND,
                )
                .await;
            statuses.push(report.status);

            if view
                .scope()
                .get_local(BREAK)
                .is_some_and(|v| convert::is_truthy(&v))
            {
                break;
            }
            if !self.settings.pacing.is_zero() && self.may_iterate(iteration) {
                let next = after(iteration_start, self.settings.pacing);
                if self.past_deadline(next) || !self.ctx.sleep_until(next).await {
                    break;
                }
            }
        }

        self.run_setup(&self.ctx.teardown(), NodeKind::AfterThread, &mut statuses)
            .await;

        self.counters.ended.fetch_add(1, Ordering::AcqRel);
        self.ctx
            .hooks()
            .thread_ended(&self.ctx, &self.group, self.user_id)
            .await;
        tracing::debug!(user_id = self.user_id, iterations = iteration, "virtual user ended");
        statuses
    }

    /// Run the `BeforeThread` or `AfterThread` children of the group.
    async fn run_setup(
        &self,
        ctx: &ExecutionContext,
        kind: NodeKind,
        statuses: &mut Vec<ReportNodeStatus>,
    ) {
        for child in self.node.children.iter().filter(|c| c.kind == kind) {
            if ctx.is_aborted() {
                break;
            }
            let report = ctx.run_child(child, self.group.id).await;
            statuses.push(report.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(users: u64, rampup_ms: u64, pack: u64) -> GroupSettings {
        GroupSettings {
            users,
            iterations: 1,
            rampup: Duration::from_millis(rampup_ms),
            pacing: Duration::ZERO,
            start_offset: Duration::from_millis(10),
            max_duration: None,
            pack,
        }
    }

    #[test]
    fn users_spread_over_rampup() {
        let s = settings(4, 400, 1);
        let delays: Vec<u128> = (1..=4).map(|k| s.start_delay(k).as_millis()).collect();
        assert_eq!(delays, vec![10, 110, 210, 310]);
    }

    #[test]
    fn packs_start_together() {
        let s = settings(4, 400, 2);
        let delays: Vec<u128> = (1..=4).map(|k| s.start_delay(k).as_millis()).collect();
        assert_eq!(delays, vec![10, 10, 210, 210]);
    }

    #[test]
    fn huge_rampup_saturates() {
        let s = GroupSettings {
            rampup: Duration::MAX,
            start_offset: Duration::MAX,
            ..settings(u64::MAX, 0, 1)
        };
        assert_eq!(s.start_delay(1), Duration::MAX);
        assert_eq!(s.start_delay(u64::MAX), Duration::MAX);

        let now = Instant::now();
        assert!(after(now, Duration::MAX) > now);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn last_iteration_is_known() {
        let bounded = GroupSettings {
            iterations: 2,
            ..settings(1, 0, 1)
        };
        assert!(bounded.wants_more(1));
        assert!(!bounded.wants_more(2));
        let unbounded = GroupSettings {
            iterations: 0,
            ..settings(1, 0, 1)
        };
        assert!(unbounded.wants_more(u64::MAX));
    }
}
