//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor_core::ReportNodeId;
use arbor_engine::{Engine, EngineBuilder, EngineError, ExecutionContext, NodeHandler, Services};
use arbor_execution::{ReportNode, ReportNodeStatus};
use arbor_memory::{
    LocalFunctionService, MemoryDataPoolFactory, MemoryPlanStore, MemoryReportStore, SimpleEvaluator,
};
use arbor_plan::{NodeKind, PlanNode};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Test handlers
// ---------------------------------------------------------------------------

/// Records the value of `params.value` (an expression) and ends with
/// `params.status`, `passed` by default.
#[derive(Debug, Default)]
pub struct RecordHandler {
    pub seen: Mutex<Vec<Value>>,
}

impl RecordHandler {
    pub fn values(&self) -> Vec<Value> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl NodeHandler for RecordHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        _report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Custom { params, .. } = &node.kind else {
            return Err(EngineError::Internal("record expects a custom node".into()));
        };
        if let Some(Value::String(expr)) = params.get("value") {
            let value = ctx.evaluate(&arbor_plan::DynamicValue::expression(expr.as_str()))?;
            self.seen.lock().push(value);
        }
        let status = match params.get("status") {
            Some(status) => serde_json::from_value(status.clone())
                .map_err(|err| EngineError::invalid_parameter("status", err.to_string()))?,
            None => ReportNodeStatus::Passed,
        };
        Ok(status)
    }
}

/// Fails the first `failures` executions, then passes.
#[derive(Debug)]
pub struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeHandler for FlakyHandler {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _node: &PlanNode,
        _report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Ok(ReportNodeStatus::Failed)
        } else {
            Ok(ReportNodeStatus::Passed)
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// In-memory collaborators plus an engine with `record` registered.
pub struct Harness {
    pub reports: Arc<MemoryReportStore>,
    pub plans: Arc<MemoryPlanStore>,
    pub functions: Arc<LocalFunctionService>,
    pub pools: Arc<MemoryDataPoolFactory>,
    pub record: Arc<RecordHandler>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    /// Build with extra engine configuration.
    pub fn with(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        Self::with_functions(LocalFunctionService::new(), configure)
    }

    pub fn with_functions(
        functions: LocalFunctionService,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        arbor_log::init_test();
        let reports = Arc::new(MemoryReportStore::new());
        let plans = Arc::new(MemoryPlanStore::new());
        let functions = Arc::new(functions);
        let pools = Arc::new(MemoryDataPoolFactory::new());
        let record = Arc::new(RecordHandler::default());
        let services = Services {
            reports: reports.clone(),
            plans: plans.clone(),
            evaluator: Arc::new(SimpleEvaluator::new()),
            functions: functions.clone(),
            data_pools: pools.clone(),
        };
        let builder = Engine::builder(services).handler("record", record.clone());
        let engine = configure(builder).build();
        Self {
            reports,
            plans,
            functions,
            pools,
            record,
            engine,
        }
    }

    pub fn children(&self, parent: ReportNodeId) -> Vec<ReportNode> {
        self.reports.children_snapshot(parent)
    }

    pub fn node(&self, id: ReportNodeId) -> ReportNode {
        self.reports.node(id).expect("report node stored")
    }
}

/// A `record` node capturing `expr`.
pub fn record(expr: &str) -> PlanNode {
    PlanNode::custom("record", json!({ "value": expr }))
}

/// A `record` node ending with `status`.
pub fn outcome(status: &str) -> PlanNode {
    PlanNode::custom("record", json!({ "status": status }))
}
