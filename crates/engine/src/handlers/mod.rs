//! Built-in node handlers.

use std::sync::Arc;

use arbor_plan::PlanNode;
use tokio::sync::Semaphore;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::registry::HandlerRegistry;

pub mod branch;
pub mod call;
pub mod iteration;
pub mod leaf;
pub mod poll;
pub mod retry;
pub mod scope;
pub mod sequence;
pub mod suite;
pub mod thread_group;

pub use branch::{IfHandler, SwitchHandler};
pub use call::{CallFunctionHandler, CallPlanHandler};
pub use iteration::{ForEachHandler, ForHandler};
pub use leaf::{AssertHandler, CheckHandler, EchoHandler, SleepHandler};
pub use poll::WaitAndPollHandler;
pub use retry::RetryHandler;
pub use scope::{ReturnHandler, SelectHandler, SessionHandler, SetHandler};
pub use sequence::{GroupHandler, SequenceHandler, SynchronizedHandler};
pub use suite::{TestScenarioHandler, TestSetHandler};
pub use thread_group::ThreadGroupHandler;

/// Register a handler for every built-in node kind.
pub fn register_builtins(registry: &HandlerRegistry) {
    let group = Arc::new(GroupHandler);
    registry.register("sequence", Arc::new(SequenceHandler));
    registry.register("before_sequence", group.clone());
    registry.register("after_sequence", group.clone());
    registry.register("before_thread", group.clone());
    registry.register("after_thread", group.clone());
    registry.register("case", group.clone());
    registry.register("test_case", group);
    registry.register("if", Arc::new(IfHandler));
    registry.register("switch", Arc::new(SwitchHandler));
    registry.register("for", Arc::new(ForHandler));
    registry.register("for_each", Arc::new(ForEachHandler));
    registry.register("thread_group", Arc::new(ThreadGroupHandler));
    registry.register("retry_if_fails", Arc::new(RetryHandler));
    registry.register("wait_and_poll", Arc::new(WaitAndPollHandler));
    registry.register("session", Arc::new(SessionHandler));
    registry.register("set", Arc::new(SetHandler));
    registry.register("select", Arc::new(SelectHandler));
    registry.register("return", Arc::new(ReturnHandler));
    registry.register("call_function", Arc::new(CallFunctionHandler));
    registry.register("call_plan", Arc::new(CallPlanHandler));
    registry.register("check", Arc::new(CheckHandler));
    registry.register("assert", Arc::new(AssertHandler));
    registry.register("echo", Arc::new(EchoHandler));
    registry.register("sleep", Arc::new(SleepHandler));
    registry.register("synchronized", Arc::new(SynchronizedHandler));
    registry.register("test_set", Arc::new(TestSetHandler));
    registry.register("test_scenario", Arc::new(TestScenarioHandler));
}

/// Check a requested worker count against the configured maximum.
pub(crate) fn worker_count(ctx: &ExecutionContext, threads: u64) -> Result<usize, EngineError> {
    let max = ctx.config().max_threads.min(Semaphore::MAX_PERMITS);
    usize::try_from(threads)
        .ok()
        .filter(|t| (1..=max).contains(t))
        .ok_or_else(|| EngineError::invalid_parameter("threads", format!("must be between 1 and {max}")))
}

/// Error for a handler dispatched with a node of another kind.
pub(crate) fn kind_mismatch(expected: &str, node: &PlanNode) -> EngineError {
    EngineError::Internal(format!(
        "{expected} handler cannot execute a `{}` node",
        node.kind.tag()
    ))
}
