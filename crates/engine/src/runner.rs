//! Engine entry point and run lifecycle.
//!
//! A run moves through `Initializing -> Importing -> Running -> Exporting ->
//! Ended`. Abort can arrive at any point through an [`AbortHandle`]. It
//! stops new work while teardown children still run, and the run walks
//! through `Exporting` and `Ended`.

use std::sync::Arc;
use std::time::Duration;

use arbor_core::{PlanNodeId, ReportNodeId, RunId};
use arbor_execution::{ReportNode, ReportNodeStatus, RunState, RunStatus, ScopeStack};
use arbor_plan::{PlanNode, validate_plan};
use arbor_telemetry::{EventBus, MetricsRegistry};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, LockTable, Services, report_name};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::hooks::{HookChain, PluginHook, TelemetryHook};
use crate::registry::HandlerRegistry;

/// Where the root plan of a run comes from.
#[derive(Debug, Clone)]
pub enum PlanSource {
    /// A plan held by the caller.
    Inline(PlanNode),
    /// A plan resolved through the plan accessor.
    Id(PlanNodeId),
}

impl From<PlanNode> for PlanSource {
    fn from(plan: PlanNode) -> Self {
        Self::Inline(plan)
    }
}

impl From<PlanNodeId> for PlanSource {
    fn from(id: PlanNodeId) -> Self {
        Self::Id(id)
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// The run.
    pub run_id: RunId,
    /// Final run phase, `Ended` once the run returned.
    pub run_status: RunStatus,
    /// Status of the root report node.
    pub status: ReportNodeStatus,
    /// Root report node, absent when the import failed.
    pub root_report_id: Option<ReportNodeId>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Value published by a top-level `Return`.
    pub output: Option<Value>,
    /// Why the plan could not be imported.
    pub import_error: Option<String>,
}

impl RunResult {
    /// Whether the root passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ReportNodeStatus::Passed
    }

    /// Whether the root failed or hit a technical error.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Whether the run was cut short by an abort.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.status == ReportNodeStatus::Interrupted
    }
}

/// The plan execution engine.
///
/// Holds the handler registry, the hook chain and the collaborators shared
/// by every run. Cheap to share behind an `Arc`; runs are independent.
pub struct Engine {
    config: EngineConfig,
    services: Services,
    dispatcher: Dispatcher,
    hooks: Arc<HookChain>,
    events: Arc<EventBus>,
    metrics: MetricsRegistry,
    global_locks: Arc<LockTable>,
}

impl Engine {
    /// An engine with the built-in handlers, default config and no extra
    /// hooks.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self::builder(services).build()
    }

    /// Start building an engine.
    #[must_use]
    pub fn builder(services: Services) -> EngineBuilder {
        EngineBuilder::new(services)
    }

    /// The handler registry. Handlers registered here apply to later runs.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lifecycle events of every run.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Run and node counters.
    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The hook chain, telemetry first.
    #[must_use]
    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Create a run for `source` without starting it.
    #[must_use]
    pub fn prepare(&self, source: impl Into<PlanSource>) -> Run {
        Run {
            ctx: self.context(RunId::v4()),
            source: source.into(),
        }
    }

    /// Prepare and execute a run.
    pub async fn run(&self, source: impl Into<PlanSource>) -> RunResult {
        self.prepare(source).execute().await
    }

    /// Persist the `NoRun` report tree of `source` and return its root.
    pub async fn skeleton(&self, source: impl Into<PlanSource>) -> Result<ReportNode, EngineError> {
        let ctx = self.context(RunId::v4());
        let plan = import(&ctx, &source.into()).await?;
        self.dispatcher.create_skeleton(&ctx, &plan, None).await
    }

    fn context(&self, run_id: RunId) -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(RunState::new(run_id)),
            self.services.clone(),
            Arc::clone(&self.hooks),
            self.dispatcher.clone(),
            self.config.clone(),
            Arc::clone(&self.global_locks),
            ScopeStack::new(),
        )
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("handlers", &self.registry().len())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    services: Services,
    config: EngineConfig,
    registry: HandlerRegistry,
    hooks: Vec<Arc<dyn PluginHook>>,
}

impl EngineBuilder {
    fn new(services: Services) -> Self {
        Self {
            services,
            config: EngineConfig::default(),
            registry: HandlerRegistry::with_builtins(),
            hooks: Vec::new(),
        }
    }

    /// Replace the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a plugin hook. Hooks run after the telemetry hook, in the
    /// order they were added.
    pub fn hook(mut self, hook: Arc<dyn PluginHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Register a handler, replacing any built-in under the same key.
    pub fn handler(self, key: impl Into<String>, handler: Arc<dyn NodeHandler>) -> Self {
        self.registry.register(key, handler);
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        let events = Arc::new(EventBus::new(self.config.event_capacity));
        let metrics = MetricsRegistry::new();
        let telemetry = TelemetryHook::new(Arc::clone(&events), metrics.clone());
        let hooks = self
            .hooks
            .into_iter()
            .fold(
                HookChain::new()
                    .with_failure_limit(self.config.hook_failure_limit)
                    .with_hook(Arc::new(telemetry)),
                HookChain::with_hook,
            );

        Engine {
            config: self.config,
            services: self.services,
            dispatcher: Dispatcher::new(Arc::new(self.registry)),
            hooks: Arc::new(hooks),
            events,
            metrics,
            global_locks: Arc::new(LockTable::default()),
        }
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

/// A prepared run.
#[derive(Debug)]
pub struct Run {
    ctx: ExecutionContext,
    source: PlanSource,
}

impl Run {
    /// Id of this run.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.ctx.run_id()
    }

    /// A handle that can abort the run from anywhere.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            run: self.ctx.run_handle(),
        }
    }

    /// The root context of the run.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Bind a variable visible to the whole plan.
    pub fn bind(&self, key: impl Into<String>, value: Value) {
        self.ctx.scope().set(key, value);
    }

    /// Import, execute and export the run.
    pub async fn execute(self) -> RunResult {
        let Self { ctx, source } = self;
        let run_id = ctx.run_id();
        let started = Instant::now();
        tracing::info!(%run_id, "run started");

        transition(&ctx, RunStatus::Importing);
        let (status, root_report_id, import_error) = match import(&ctx, &source).await {
            Ok(plan) => {
                transition(&ctx, RunStatus::Running);
                ctx.hooks().run_start(&ctx, &plan).await;
                let root = ReportNode::new(run_id, None, plan.id, report_name(&plan), plan.kind.tag());
                let root = ctx.dispatcher().execute(&ctx, &plan, root).await;
                let status = if ctx.is_aborted() && root.status == ReportNodeStatus::Passed {
                    ReportNodeStatus::Interrupted
                } else {
                    root.status
                };
                (status, Some(root.id), None)
            }
            Err(err) => {
                tracing::error!(%run_id, error = %err, "plan import failed");
                (ReportNodeStatus::TechnicalError, None, Some(err.to_string()))
            }
        };

        transition(&ctx, RunStatus::Exporting);
        let mut result = RunResult {
            run_id,
            run_status: ctx.run().status(),
            status,
            root_report_id,
            duration: started.elapsed(),
            output: ctx.returned(),
            import_error,
        };
        ctx.hooks().run_end(&ctx, &result).await;
        transition(&ctx, RunStatus::Ended);
        result.run_status = ctx.run().status();

        tracing::info!(
            %run_id,
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "run ended"
        );
        result
    }
}

/// Aborts a run. Cloneable and usable from any task.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    run: Arc<RunState>,
}

impl AbortHandle {
    /// Request the abort. Returns `true` only for the first request.
    pub fn abort(&self) -> bool {
        self.run.abort()
    }

    /// Whether the run was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.run.is_aborted()
    }
}

/// Resolve and validate the root plan.
async fn import(ctx: &ExecutionContext, source: &PlanSource) -> Result<PlanNode, EngineError> {
    let plan = match source {
        PlanSource::Inline(plan) => plan.clone(),
        PlanSource::Id(id) => ctx
            .services()
            .plans
            .get(*id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(id.to_string()))?,
    };
    let errors = validate_plan(&plan);
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EngineError::InvalidPlan(joined));
    }
    Ok(plan)
}

fn transition(ctx: &ExecutionContext, to: RunStatus) {
    if let Err(err) = ctx.run().transition(to) {
        tracing::warn!(run_id = %ctx.run_id(), error = %err, "run status transition rejected");
    }
}
