//! Loops: For and ForEach.
//!
//! Both loops share one driver. An [`IterationSource`] yields the bindings
//! of each iteration; the driver runs the loop body once per item, either
//! in order or on a pool of workers pulling from the same source.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arbor_core::ReportNodeId;
use arbor_execution::{ReportNode, ReportNodeStatus, StatusComposer};
use arbor_plan::{LoopParams, NodeKind, PlanNode};
use arbor_ports::DataPool;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::context::ExecutionContext;
use crate::convert;
use crate::dispatcher::ITERATION_KIND;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::{kind_mismatch, worker_count};
use crate::handlers::sequence::fold;

/// Variable holding the 1-based iteration number.
pub const GLOBAL_COUNTER: &str = "globalCounter";
/// Variable holding the worker id, 1 in sequential mode.
pub const USER_ID: &str = "userId";
/// Setting this variable to `true` in an iteration stops the loop.
pub const BREAK: &str = "break";

type Bindings = Vec<(String, Value)>;

/// Yields the bindings of successive iterations.
#[async_trait]
trait IterationSource: Send {
    async fn next(&mut self) -> Result<Option<Bindings>, EngineError>;

    /// Number of items left, when known.
    fn remaining(&self) -> Option<u64> {
        None
    }

    async fn close(&mut self) {}
}

struct RangeSource {
    next: Option<i64>,
    end: Option<i64>,
    inc: i64,
    counter: String,
}

#[async_trait]
impl IterationSource for RangeSource {
    async fn next(&mut self) -> Result<Option<Bindings>, EngineError> {
        let Some(value) = self.next else {
            return Ok(None);
        };
        let done = match self.end {
            Some(end) if self.inc > 0 => value >= end,
            Some(end) => value <= end,
            None => false,
        };
        if done {
            return Ok(None);
        }
        self.next = value.checked_add(self.inc);
        Ok(Some(vec![(self.counter.clone(), json!(value))]))
    }

    fn remaining(&self) -> Option<u64> {
        let Some(next) = self.next else {
            return Some(0);
        };
        let end = self.end?;
        let span = if self.inc > 0 {
            i128::from(end) - i128::from(next)
        } else {
            i128::from(next) - i128::from(end)
        };
        if span <= 0 {
            return Some(0);
        }
        let step = i128::from(self.inc.unsigned_abs());
        u64::try_from((span + step - 1) / step).ok()
    }
}

struct PoolSource {
    pool: Box<dyn DataPool>,
    item: String,
    header: bool,
}

#[async_trait]
impl IterationSource for PoolSource {
    async fn next(&mut self) -> Result<Option<Bindings>, EngineError> {
        let row = self.pool.next().await?;
        Ok(row.map(|row| vec![(self.item.clone(), row.as_binding(self.header))]))
    }

    async fn close(&mut self) {
        if let Err(err) = self.pool.close().await {
            tracing::warn!(error = %err, "failed to close data pool");
        }
    }
}

/// Resolved [`LoopParams`].
#[derive(Debug, Clone, Copy)]
struct LoopLimits {
    max_loops: Option<u64>,
    max_failed: Option<u64>,
    parallel: bool,
    threads: usize,
}

impl LoopLimits {
    fn resolve(ctx: &ExecutionContext, params: &LoopParams) -> Result<Self, EngineError> {
        let max_loops = params
            .max_loops
            .as_ref()
            .map(|v| ctx.eval_u64(v, "maxLoops"))
            .transpose()?;
        let max_failed = params
            .max_failed_loops
            .as_ref()
            .map(|v| ctx.eval_u64(v, "maxFailedLoops"))
            .transpose()?;
        let parallel = ctx.eval_or(params.parallel.as_ref(), false, |c, v| c.eval_bool(v, "parallel"))?;
        let threads = if parallel {
            let default = u64::try_from(ctx.config().default_threads).unwrap_or(u64::MAX);
            let threads = ctx.eval_or(params.threads.as_ref(), default, |c, v| c.eval_u64(v, "threads"))?;
            worker_count(ctx, threads)?
        } else {
            1
        };
        Ok(Self {
            max_loops,
            max_failed,
            parallel,
            threads,
        })
    }

    /// Workers worth spawning when `remaining` items are known to be left.
    fn workers(&self, remaining: Option<u64>) -> u64 {
        let threads = u64::try_from(self.threads).unwrap_or(u64::MAX);
        [Some(threads), self.max_loops, remaining]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(threads)
    }
}

/// Counters shared by every worker of one loop.
#[derive(Debug, Default)]
struct LoopState {
    started: AtomicU64,
    failed: AtomicU64,
    stop: AtomicBool,
}

impl LoopState {
    /// Whether another iteration may be scheduled.
    fn may_continue(&self, ctx: &ExecutionContext, limits: &LoopLimits) -> bool {
        !ctx.is_aborted()
            && !ctx.has_returned()
            && !self.stop.load(Ordering::Acquire)
            && limits
                .max_failed
                .is_none_or(|max| self.failed.load(Ordering::Acquire) < max)
            && limits
                .max_loops
                .is_none_or(|max| self.started.load(Ordering::Acquire) < max)
    }
}

async fn run_loop(
    ctx: &ExecutionContext,
    node: &PlanNode,
    report: &mut ReportNode,
    source: Box<dyn IterationSource>,
    limits: LoopLimits,
) -> Result<ReportNodeStatus, EngineError> {
    let state = Arc::new(LoopState::default());
    let mut composer = StatusComposer::new();

    let outcome = if limits.parallel {
        run_parallel(ctx, node, report.id, source, limits, &state, &mut composer).await
    } else {
        run_sequential(ctx, node, report.id, source, limits, &state, &mut composer).await
    };

    let started = state.started.load(Ordering::Acquire);
    let failed = state.failed.load(Ordering::Acquire);
    report.set_attribute("count", started);
    report.set_attribute("errorCount", failed);
    tracing::debug!(iterations = started, failed, "loop finished");
    outcome?;

    if ctx.is_aborted() {
        composer.mark_interrupted();
    }
    Ok(composer.finish())
}

async fn run_sequential(
    ctx: &ExecutionContext,
    node: &PlanNode,
    parent: ReportNodeId,
    mut source: Box<dyn IterationSource>,
    limits: LoopLimits,
    state: &LoopState,
    composer: &mut StatusComposer,
) -> Result<(), EngineError> {
    let mut outcome = Ok(());
    while state.may_continue(ctx, &limits) {
        let bindings = match source.next().await {
            Ok(Some(bindings)) => bindings,
            Ok(None) => break,
            Err(err) => {
                outcome = Err(err);
                break;
            }
        };
        let index = state.started.fetch_add(1, Ordering::AcqRel) + 1;
        let status = run_iteration(ctx, node, parent, index, 1, bindings, state).await;
        fold(composer, status);
    }
    source.close().await;
    outcome
}

async fn run_parallel(
    ctx: &ExecutionContext,
    node: &PlanNode,
    parent: ReportNodeId,
    source: Box<dyn IterationSource>,
    limits: LoopLimits,
    state: &Arc<LoopState>,
    composer: &mut StatusComposer,
) -> Result<(), EngineError> {
    let workers = limits.workers(source.remaining());
    let source = Arc::new(Mutex::new(source));
    let node = Arc::new(node.clone());
    let mut join_set = JoinSet::new();
    for user_id in 1..=workers {
        let worker = LoopWorker {
            ctx: ctx.clone(),
            node: Arc::clone(&node),
            parent,
            user_id,
            source: Arc::clone(&source),
            state: Arc::clone(state),
            limits,
        };
        join_set.spawn(worker.run());
    }

    let mut outcome = Ok(());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(statuses)) => statuses.into_iter().for_each(|s| fold(composer, s)),
            Ok(Err(err)) => {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
            Err(join_err) => {
                tracing::error!(?join_err, "loop worker panicked");
                composer.add(ReportNodeStatus::TechnicalError);
            }
        }
    }
    source.lock().await.close().await;
    outcome
}

/// One worker of a parallel loop.
struct LoopWorker {
    ctx: ExecutionContext,
    node: Arc<PlanNode>,
    parent: ReportNodeId,
    user_id: u64,
    source: Arc<Mutex<Box<dyn IterationSource>>>,
    state: Arc<LoopState>,
    limits: LoopLimits,
}

impl LoopWorker {
    async fn run(self) -> Result<Vec<ReportNodeStatus>, EngineError> {
        let mut statuses = Vec::new();
        loop {
            let (index, bindings) = {
                let mut source = self.source.lock().await;
                if !self.state.may_continue(&self.ctx, &self.limits) {
                    break;
                }
                match source.next().await {
                    Ok(Some(bindings)) => {
                        let index = self.state.started.fetch_add(1, Ordering::AcqRel) + 1;
                        (index, bindings)
                    }
                    Ok(None) => break,
                    Err(err) => {
                        self.state.stop.store(true, Ordering::Release);
                        return Err(err);
                    }
                }
            };
            let status = run_iteration(
                &self.ctx,
                &self.node,
                self.parent,
                index,
                self.user_id,
                bindings,
                &self.state,
            )
            .await;
            statuses.push(status);
        }
        Ok(statuses)
    }
}

/// Run the loop body once in a fresh frame holding `bindings`.
async fn run_iteration(
    ctx: &ExecutionContext,
    node: &PlanNode,
    parent: ReportNodeId,
    index: u64,
    user_id: u64,
    bindings: Bindings,
    state: &LoopState,
) -> ReportNodeStatus {
    let view = ctx.child();
    for (key, value) in bindings {
        view.scope().set(key, value);
    }
    view.scope().set(GLOBAL_COUNTER, json!(index));
    view.scope().set(USER_ID, json!(user_id));

    let report = ctx
        .dispatcher()
        .execute_body(&view, node, parent, format!("Iteration {index}"), ITERATION_KIND)
        .await;
    if report.status.is_failure() {
        state.failed.fetch_add(1, Ordering::AcqRel);
    }
    if view
        .scope()
        .get_local(BREAK)
        .is_some_and(|v| convert::is_truthy(&v))
    {
        state.stop.store(true, Ordering::Release);
    }
    report.status
}

/// Handler for [`NodeKind::For`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ForHandler;

#[async_trait]
impl NodeHandler for ForHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::For(params) = &node.kind else {
            return Err(kind_mismatch("for", node));
        };
        let start = ctx.eval_or(params.start.as_ref(), 0, |c, v| c.eval_i64(v, "start"))?;
        let end = params
            .end
            .as_ref()
            .map(|v| ctx.eval_i64(v, "end"))
            .transpose()?;
        let inc = ctx.eval_or(params.inc.as_ref(), 1, |c, v| c.eval_i64(v, "inc"))?;
        if inc == 0 {
            return Err(EngineError::invalid_parameter("inc", "must not be zero"));
        }
        let limits = LoopLimits::resolve(ctx, &params.looping)?;
        report.input = Some(json!({ "start": start, "end": end, "inc": inc }));

        let source = RangeSource {
            next: Some(start),
            end,
            inc,
            counter: params.counter.clone(),
        };
        run_loop(ctx, node, report, Box::new(source), limits).await
    }
}

/// Handler for [`NodeKind::ForEach`].
///
/// Opens one pool per execution and closes it once the loop is over, on
/// every path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForEachHandler;

#[async_trait]
impl NodeHandler for ForEachHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::ForEach(params) = &node.kind else {
            return Err(kind_mismatch("for each", node));
        };
        let limits = LoopLimits::resolve(ctx, &params.looping)?;
        let config = ctx.evaluate(&params.source.config)?;
        let pool = ctx
            .services()
            .data_pools
            .open(&params.source.kind, config)
            .await?;
        report.set_attribute("source", params.source.kind.clone());

        let source = PoolSource {
            pool,
            item: params.item.clone(),
            header: params.header,
        };
        run_loop(ctx, node, report, Box::new(source), limits).await
    }
}
