//! Lifecycle plugin hooks.
//!
//! Hooks observe a run: its start and end, every report node before and
//! after execution, and virtual users of thread groups. A failing or
//! panicking hook is logged and skipped; it never changes a node's outcome.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_execution::{ReportNode, ReportNodeStatus};
use arbor_plan::PlanNode;
use arbor_telemetry::{EventBus, ExecutionEvent, MetricsRegistry, metrics};
use async_trait::async_trait;
use futures::FutureExt;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::runner::RunResult;

/// An observer of run and node lifecycle events.
///
/// Every method defaults to a no-op.
#[async_trait]
pub trait PluginHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The run entered `Running` with `plan` as its root. Bindings set on
    /// `ctx.scope()` are visible to the whole plan.
    async fn on_run_start(&self, _ctx: &ExecutionContext, _plan: &PlanNode) -> anyhow::Result<()> {
        Ok(())
    }

    /// The run is exporting its result.
    async fn on_run_end(&self, _ctx: &ExecutionContext, _result: &RunResult) -> anyhow::Result<()> {
        Ok(())
    }

    /// `report` was created and is about to execute.
    async fn before_node(
        &self,
        _ctx: &ExecutionContext,
        _node: &PlanNode,
        _report: &ReportNode,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// `report` was finalized.
    async fn after_node(
        &self,
        _ctx: &ExecutionContext,
        _node: &PlanNode,
        _report: &ReportNode,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A thread group started virtual user `user_id`.
    async fn on_thread_started(
        &self,
        _ctx: &ExecutionContext,
        _group: &ReportNode,
        _user_id: u64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Virtual user `user_id` finished.
    async fn on_thread_ended(
        &self,
        _ctx: &ExecutionContext,
        _group: &ReportNode,
        _user_id: u64,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered list of hooks, notified in registration order.
pub struct HookChain {
    hooks: Vec<Arc<dyn PluginHook>>,
    failures: AtomicU64,
    failure_limit: Option<u64>,
}

impl HookChain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            failures: AtomicU64::new(0),
            failure_limit: None,
        }
    }

    /// Stop logging failures after `limit` of them.
    #[must_use]
    pub fn with_failure_limit(mut self, limit: Option<u64>) -> Self {
        self.failure_limit = limit;
        self
    }

    /// Append a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PluginHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether the chain has no hooks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hook failures and panics seen so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub(crate) async fn run_start(&self, ctx: &ExecutionContext, plan: &PlanNode) {
        for hook in &self.hooks {
            self.guard(hook.name(), "on_run_start", hook.on_run_start(ctx, plan))
                .await;
        }
    }

    pub(crate) async fn run_end(&self, ctx: &ExecutionContext, result: &RunResult) {
        for hook in &self.hooks {
            self.guard(hook.name(), "on_run_end", hook.on_run_end(ctx, result))
                .await;
        }
    }

    pub(crate) async fn before_node(&self, ctx: &ExecutionContext, node: &PlanNode, report: &ReportNode) {
        for hook in &self.hooks {
            self.guard(hook.name(), "before_node", hook.before_node(ctx, node, report))
                .await;
        }
    }

    pub(crate) async fn after_node(&self, ctx: &ExecutionContext, node: &PlanNode, report: &ReportNode) {
        for hook in &self.hooks {
            self.guard(hook.name(), "after_node", hook.after_node(ctx, node, report))
                .await;
        }
    }

    pub(crate) async fn thread_started(&self, ctx: &ExecutionContext, group: &ReportNode, user_id: u64) {
        for hook in &self.hooks {
            self.guard(
                hook.name(),
                "on_thread_started",
                hook.on_thread_started(ctx, group, user_id),
            )
            .await;
        }
    }

    pub(crate) async fn thread_ended(&self, ctx: &ExecutionContext, group: &ReportNode, user_id: u64) {
        for hook in &self.hooks {
            self.guard(
                hook.name(),
                "on_thread_ended",
                hook.on_thread_ended(ctx, group, user_id),
            )
            .await;
        }
    }

    async fn guard(&self, hook: &str, event: &'static str, call: impl Future<Output = anyhow::Result<()>>) {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.record_failure(hook, event, &format!("{err:#}")),
            Err(payload) => {
                let err = EngineError::from_panic(&*payload);
                self.record_failure(hook, event, &err.to_string());
            }
        }
    }

    fn record_failure(&self, hook: &str, event: &'static str, message: &str) {
        let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        match self.failure_limit {
            Some(limit) if count > limit => {
                if count == limit + 1 {
                    tracing::warn!(limit, "hook failure limit reached, muting further hook failures");
                }
            }
            _ => tracing::warn!(hook, event, error = %message, "plugin hook failed"),
        }
    }
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.iter().map(|h| h.name().to_owned()).collect::<Vec<_>>())
            .field("failures", &self.failures())
            .finish()
    }
}

/// Projects the run lifecycle onto the event bus and metrics.
///
/// Metric names are the constants of [`arbor_telemetry::metrics`].
#[derive(Debug)]
pub struct TelemetryHook {
    events: Arc<EventBus>,
    metrics: MetricsRegistry,
}

impl TelemetryHook {
    /// A hook publishing to `events` and `metrics`.
    #[must_use]
    pub fn new(events: Arc<EventBus>, metrics: MetricsRegistry) -> Self {
        Self { events, metrics }
    }
}

#[async_trait]
impl PluginHook for TelemetryHook {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn on_run_start(&self, ctx: &ExecutionContext, plan: &PlanNode) -> anyhow::Result<()> {
        self.metrics.counter(metrics::RUNS_STARTED).inc();
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: ctx.run_id(),
            plan_id: plan.id,
        });
        Ok(())
    }

    async fn on_run_end(&self, _ctx: &ExecutionContext, result: &RunResult) -> anyhow::Result<()> {
        self.metrics.counter(metrics::RUNS_ENDED).inc();
        self.events.emit(ExecutionEvent::RunEnded {
            run_id: result.run_id,
            run_status: result.run_status,
            status: result.status,
            duration: result.duration,
        });
        Ok(())
    }

    async fn before_node(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &ReportNode,
    ) -> anyhow::Result<()> {
        self.metrics.counter(metrics::NODES_STARTED).inc();
        self.events.emit(ExecutionEvent::NodeStarted {
            run_id: ctx.run_id(),
            report_id: report.id,
            plan_node_id: node.id,
            kind: report.kind.clone(),
            name: report.name.clone(),
        });
        Ok(())
    }

    async fn after_node(
        &self,
        ctx: &ExecutionContext,
        _node: &PlanNode,
        report: &ReportNode,
    ) -> anyhow::Result<()> {
        let duration = report.duration.unwrap_or_default();
        self.metrics.counter(metrics::NODES_FINISHED).inc();
        if report.status.is_failure() {
            self.metrics.counter(metrics::NODES_FAILED).inc();
        } else if report.status == ReportNodeStatus::Interrupted {
            self.metrics.counter(metrics::NODES_INTERRUPTED).inc();
        }
        self.metrics
            .histogram(metrics::NODE_DURATION_MS)
            .observe(duration.as_secs_f64() * 1000.0);
        self.events.emit(ExecutionEvent::NodeFinished {
            run_id: ctx.run_id(),
            report_id: report.id,
            kind: report.kind.clone(),
            status: report.status,
            duration,
        });
        Ok(())
    }

    async fn on_thread_started(
        &self,
        ctx: &ExecutionContext,
        group: &ReportNode,
        user_id: u64,
    ) -> anyhow::Result<()> {
        self.metrics.gauge(metrics::ACTIVE_USERS).inc();
        self.events.emit(ExecutionEvent::ThreadStarted {
            run_id: ctx.run_id(),
            group_id: group.id,
            user_id,
        });
        Ok(())
    }

    async fn on_thread_ended(
        &self,
        ctx: &ExecutionContext,
        group: &ReportNode,
        user_id: u64,
    ) -> anyhow::Result<()> {
        self.metrics.gauge(metrics::ACTIVE_USERS).dec();
        self.events.emit(ExecutionEvent::ThreadEnded {
            run_id: ctx.run_id(),
            group_id: group.id,
            user_id,
        });
        Ok(())
    }
}
