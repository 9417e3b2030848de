//! Per-run execution context.
//!
//! An [`ExecutionContext`] is a cheap handle: the run-wide state sits behind
//! an `Arc`, while the scope handle and the unit state are per view. Workers
//! spawned by fan-out handlers get their own view, never a thread-local.

use std::sync::Arc;
use std::time::Duration;

use arbor_core::{ReportNodeId, RunId};
use arbor_execution::{ReportNode, RunState, ScopeStack};
use arbor_plan::{DynamicValue, PlanNode};
use arbor_ports::{
    DataPoolFactory, ExpressionEvaluator, FunctionExecutionService, PlanNodeAccessor, PortsError,
    ReportNodeAccessor,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::convert;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::hooks::HookChain;

/// The collaborators a run talks to.
#[derive(Clone)]
pub struct Services {
    /// Where report nodes are persisted.
    pub reports: Arc<dyn ReportNodeAccessor>,
    /// Where plans and sub-plans are resolved.
    pub plans: Arc<dyn PlanNodeAccessor>,
    /// Evaluates dynamic parameters.
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    /// Runs keyword calls.
    pub functions: Arc<dyn FunctionExecutionService>,
    /// Opens data pools for `ForEach`.
    pub data_pools: Arc<dyn DataPoolFactory>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Named mutexes used by `Synchronized` nodes.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl LockTable {
    pub(crate) fn get(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(name.to_owned()).or_default().clone()
    }
}

/// State of the enclosing unit: the run itself or a sub-plan call.
#[derive(Debug, Default)]
struct UnitState {
    returned: Mutex<Option<Value>>,
}

struct RunShared {
    run: Arc<RunState>,
    services: Services,
    hooks: Arc<HookChain>,
    dispatcher: Dispatcher,
    config: EngineConfig,
    locks: LockTable,
    global_locks: Arc<LockTable>,
}

/// Handle on the state of one run.
///
/// Cloning is cheap and yields a view sharing the same scope frame; use
/// [`child`](Self::child) to get a view with a private innermost frame.
///
/// A [`teardown`](Self::teardown) view does not see the abort, so
/// `AfterSequence` and `AfterThread` children still run while the run is
/// aborting.
#[derive(Clone)]
pub struct ExecutionContext {
    shared: Arc<RunShared>,
    scope: ScopeStack,
    unit: Arc<UnitState>,
    teardown: bool,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id())
            .field("status", &self.shared.run.status())
            .field("scope_depth", &self.scope.depth())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub(crate) fn new(
        run: Arc<RunState>,
        services: Services,
        hooks: Arc<HookChain>,
        dispatcher: Dispatcher,
        config: EngineConfig,
        global_locks: Arc<LockTable>,
        scope: ScopeStack,
    ) -> Self {
        Self {
            shared: Arc::new(RunShared {
                run,
                services,
                hooks,
                dispatcher,
                config,
                locks: LockTable::default(),
                global_locks,
            }),
            scope,
            unit: Arc::new(UnitState::default()),
            teardown: false,
        }
    }

    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.shared.run.run_id()
    }

    /// Run phase and abort flag.
    #[must_use]
    pub fn run(&self) -> &RunState {
        &self.shared.run
    }

    pub(crate) fn run_handle(&self) -> Arc<RunState> {
        Arc::clone(&self.shared.run)
    }

    /// Whether this view must stop starting new work.
    ///
    /// Always `false` in a teardown view.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        !self.teardown && self.shared.run.is_aborted()
    }

    /// Request an abort. Returns `false` if it was a no-op.
    pub fn abort(&self) -> bool {
        self.shared.run.abort()
    }

    /// Token cancelled when the run aborts.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        self.shared.run.cancellation()
    }

    /// Completes once this view sees the abort. Never completes in a
    /// teardown view.
    pub async fn cancelled(&self) {
        if self.teardown {
            std::future::pending::<()>().await;
        }
        self.cancellation().cancelled().await;
    }

    /// Variables visible to this view.
    #[must_use]
    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }

    /// A view with a fresh innermost frame.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            scope: self.scope.push(),
            unit: Arc::clone(&self.unit),
            teardown: self.teardown,
        }
    }

    /// A view sharing this frame that ignores the abort.
    #[must_use]
    pub fn teardown(&self) -> Self {
        Self {
            teardown: true,
            ..self.clone()
        }
    }

    /// A view starting a new unit (a sub-plan call) in a fresh frame.
    #[must_use]
    pub fn new_unit(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            scope: self.scope.push(),
            unit: Arc::new(UnitState::default()),
            teardown: self.teardown,
        }
    }

    /// Collaborators.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.shared.services
    }

    /// Plugin hook chain.
    #[must_use]
    pub fn hooks(&self) -> &HookChain {
        &self.shared.hooks
    }

    /// Dispatcher used to run child nodes.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The mutex for `name`, per run or engine-wide.
    #[must_use]
    pub fn lock(&self, name: &str, global: bool) -> Arc<tokio::sync::Mutex<()>> {
        if global {
            self.shared.global_locks.get(name)
        } else {
            self.shared.locks.get(name)
        }
    }

    /// Whether a `Return` already fired in the current unit.
    #[must_use]
    pub fn has_returned(&self) -> bool {
        self.unit.returned.lock().is_some()
    }

    /// Publish the unit's return value. The first return wins.
    pub fn set_return(&self, value: Value) -> bool {
        let mut slot = self.unit.returned.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// The unit's return value, if any.
    #[must_use]
    pub fn returned(&self) -> Option<Value> {
        self.unit.returned.lock().clone()
    }

    /// Create a report node for `node` under `parent` and dispatch it.
    pub async fn run_child(&self, node: &PlanNode, parent: ReportNodeId) -> ReportNode {
        let report = ReportNode::new(
            self.run_id(),
            Some(parent),
            node.id,
            report_name(node),
            node.kind.tag(),
        );
        self.dispatcher().execute(self, node, report).await
    }

    /// Sleep for `duration`, waking early on abort.
    ///
    /// Returns `false` if the run is aborting.
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration).await
    }

    /// Sleep until `deadline`, waking early on abort.
    pub async fn sleep_until(&self, deadline: Instant) -> bool {
        if self.is_aborted() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => !self.is_aborted(),
            () = self.cancelled() => false,
        }
    }

    /// Resolve a dynamic parameter against the current scope.
    pub fn evaluate(&self, value: &DynamicValue) -> Result<Value, EngineError> {
        match value {
            DynamicValue::Literal { value } => Ok(value.clone()),
            DynamicValue::Expression { expr } => self
                .services()
                .evaluator
                .evaluate(expr, &self.scope.bindings())
                .map_err(|err| match err {
                    PortsError::Expression {
                        expression,
                        message,
                    } => EngineError::expression(expression, message),
                    other => EngineError::Ports(other),
                }),
        }
    }

    /// Resolve a boolean parameter.
    pub fn eval_bool(&self, value: &DynamicValue, name: &str) -> Result<bool, EngineError> {
        let resolved = self.evaluate(value)?;
        convert::as_bool(&resolved)
            .ok_or_else(|| EngineError::invalid_parameter(name, format!("expected a boolean, got {resolved}")))
    }

    /// Resolve an integer parameter.
    pub fn eval_i64(&self, value: &DynamicValue, name: &str) -> Result<i64, EngineError> {
        let resolved = self.evaluate(value)?;
        convert::as_i64(&resolved)
            .ok_or_else(|| EngineError::invalid_parameter(name, format!("expected an integer, got {resolved}")))
    }

    /// Resolve a non-negative integer parameter.
    pub fn eval_u64(&self, value: &DynamicValue, name: &str) -> Result<u64, EngineError> {
        let raw = self.eval_i64(value, name)?;
        u64::try_from(raw)
            .map_err(|_| EngineError::invalid_parameter(name, format!("must not be negative, got {raw}")))
    }

    /// Resolve a duration given in milliseconds.
    pub fn eval_millis(&self, value: &DynamicValue, name: &str) -> Result<Duration, EngineError> {
        self.eval_u64(value, name).map(Duration::from_millis)
    }

    /// Resolve a string parameter. Numbers and booleans are rendered.
    pub fn eval_string(&self, value: &DynamicValue, name: &str) -> Result<String, EngineError> {
        let resolved = self.evaluate(value)?;
        convert::as_string(&resolved)
            .ok_or_else(|| EngineError::invalid_parameter(name, format!("expected a string, got {resolved}")))
    }

    /// Resolve an optional parameter with `eval`, falling back to `default`.
    pub fn eval_or<T>(
        &self,
        value: Option<&DynamicValue>,
        default: T,
        eval: impl FnOnce(&Self, &DynamicValue) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match value {
            Some(value) => eval(self, value),
            None => Ok(default),
        }
    }
}

/// Display name of the report node created for `node`.
pub(crate) fn report_name(node: &PlanNode) -> String {
    if let Some(name) = node.name() {
        return name.to_owned();
    }
    if let arbor_plan::NodeKind::CallFunction(params) = &node.kind
        && let Some(Value::String(function)) = params.function.as_literal()
    {
        return function.clone();
    }
    node.display_name().to_owned()
}
