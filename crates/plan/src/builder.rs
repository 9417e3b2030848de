//! Shorthand constructors for authoring plans in code.
//!
//! ```rust,ignore
//! use arbor_plan::{DynamicValue, ForParams, PlanNode};
//!
//! let plan = PlanNode::sequence()
//!     .with_name("smoke")
//!     .with_child(PlanNode::set("user", DynamicValue::literal("alice")))
//!     .with_child(
//!         PlanNode::for_range(ForParams::range(0, 5).with_parallel(4))
//!             .with_child(PlanNode::call_function("Login")),
//!     );
//! ```

use std::collections::BTreeMap;

use crate::kind::{
    AssertOperator, AssertParams, CallFunctionParams, CallPlanParams, CaseParams, CheckParams,
    DataSourceSpec, EchoParams, ForEachParams, ForParams, IfParams, LoopParams, NodeKind,
    RetryParams, ReturnParams, SelectParams, SequenceParams, SetParams, SleepParams,
    SwitchParams, SynchronizedParams, TestSetParams, ThreadGroupParams, WaitAndPollParams,
};
use crate::node::PlanNode;
use crate::value::DynamicValue;

impl PlanNode {
    /// A sequence that continues after failed children.
    #[must_use]
    pub fn sequence() -> Self {
        Self::new(NodeKind::Sequence(SequenceParams::default()))
    }

    /// A session with its own scope frame.
    #[must_use]
    pub fn session() -> Self {
        Self::new(NodeKind::Session)
    }

    /// An if block.
    #[must_use]
    pub fn if_block(condition: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::If(IfParams {
            condition: condition.into(),
        }))
    }

    /// A switch over `expression`.
    #[must_use]
    pub fn switch(expression: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Switch(SwitchParams {
            expression: expression.into(),
        }))
    }

    /// A switch case matching `value`.
    #[must_use]
    pub fn case(value: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Case(CaseParams {
            value: value.into(),
        }))
    }

    /// A counting loop.
    #[must_use]
    pub fn for_range(params: ForParams) -> Self {
        Self::new(NodeKind::For(params))
    }

    /// A data-driven loop.
    #[must_use]
    pub fn for_each(params: ForEachParams) -> Self {
        Self::new(NodeKind::ForEach(params))
    }

    /// A load-generating thread group.
    #[must_use]
    pub fn thread_group(params: ThreadGroupParams) -> Self {
        Self::new(NodeKind::ThreadGroup(params))
    }

    /// A retry block.
    #[must_use]
    pub fn retry_if_fails(params: RetryParams) -> Self {
        Self::new(NodeKind::RetryIfFails(params))
    }

    /// A polling wait on `condition`.
    #[must_use]
    pub fn wait_and_poll(
        condition: impl Into<DynamicValue>,
        pacing_ms: u64,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self::new(NodeKind::WaitAndPoll(WaitAndPollParams {
            condition: condition.into(),
            pacing: Some(DynamicValue::literal(pacing_ms)),
            timeout: timeout_ms.map(DynamicValue::literal),
            max_iterations: None,
        }))
    }

    /// A variable assignment.
    #[must_use]
    pub fn set(key: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Set(SetParams {
            key: DynamicValue::literal(key.into()),
            value: value.into(),
        }))
    }

    /// A selection bound under `key`.
    #[must_use]
    pub fn select(key: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Select(SelectParams {
            key: key.into(),
            value: value.into(),
        }))
    }

    /// A return publishing `output`.
    #[must_use]
    pub fn return_value(output: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Return(ReturnParams {
            output: output.into(),
        }))
    }

    /// A keyword call without arguments.
    #[must_use]
    pub fn call_function(function: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::CallFunction(CallFunctionParams {
            function: function.into(),
            arguments: None,
            selection_criteria: BTreeMap::new(),
            timeout: None,
        }))
    }

    /// A keyword call with a JSON argument object.
    #[must_use]
    pub fn call_function_with(
        function: impl Into<DynamicValue>,
        arguments: impl Into<DynamicValue>,
    ) -> Self {
        Self::new(NodeKind::CallFunction(CallFunctionParams {
            function: function.into(),
            arguments: Some(arguments.into()),
            selection_criteria: BTreeMap::new(),
            timeout: None,
        }))
    }

    /// A call into a named sub-plan.
    #[must_use]
    pub fn call_plan(name: impl Into<DynamicValue>, input: Option<DynamicValue>) -> Self {
        Self::new(NodeKind::CallPlan(CallPlanParams {
            plan_id: None,
            plan_name: Some(name.into()),
            input,
        }))
    }

    /// A boolean check.
    #[must_use]
    pub fn check(expression: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Check(CheckParams {
            expression: expression.into(),
        }))
    }

    /// An assertion on the enclosing call's output.
    #[must_use]
    pub fn assert(
        actual: impl Into<String>,
        operator: AssertOperator,
        expected: impl Into<DynamicValue>,
    ) -> Self {
        Self::new(NodeKind::Assert(AssertParams {
            actual: actual.into(),
            operator,
            expected: expected.into(),
            negate: false,
            custom_error_message: None,
        }))
    }

    /// An echo of `text`.
    #[must_use]
    pub fn echo(text: impl Into<DynamicValue>) -> Self {
        Self::new(NodeKind::Echo(EchoParams { text: text.into() }))
    }

    /// A sleep of `duration_ms`.
    #[must_use]
    pub fn sleep(duration_ms: u64) -> Self {
        Self::new(NodeKind::Sleep(SleepParams {
            duration: DynamicValue::literal(duration_ms),
        }))
    }

    /// A block guarded by the lock `name`.
    #[must_use]
    pub fn synchronized(name: impl Into<String>, global: bool) -> Self {
        Self::new(NodeKind::Synchronized(SynchronizedParams {
            lock_name: Some(DynamicValue::literal(name.into())),
            global,
        }))
    }

    /// A test set run on `threads` workers.
    #[must_use]
    pub fn test_set(threads: u64) -> Self {
        Self::new(NodeKind::TestSet(TestSetParams {
            threads: Some(DynamicValue::literal(threads)),
        }))
    }

    /// A node dispatched to the custom handler `handler`.
    #[must_use]
    pub fn custom(handler: impl Into<String>, params: serde_json::Value) -> Self {
        Self::new(NodeKind::Custom {
            handler: handler.into(),
            params,
        })
    }
}

impl ForParams {
    /// Iterate `[start, end)` with step 1.
    #[must_use]
    pub fn range(start: i64, end: i64) -> Self {
        Self {
            start: Some(DynamicValue::literal(start)),
            end: Some(DynamicValue::literal(end)),
            inc: None,
            counter: "counter".to_owned(),
            looping: LoopParams::default(),
        }
    }

    /// Set the step.
    #[must_use]
    pub fn with_inc(mut self, inc: i64) -> Self {
        self.inc = Some(DynamicValue::literal(inc));
        self
    }

    /// Rename the loop variable.
    #[must_use]
    pub fn with_counter(mut self, counter: impl Into<String>) -> Self {
        self.counter = counter.into();
        self
    }

    /// Run on `threads` workers.
    #[must_use]
    pub fn with_parallel(mut self, threads: u64) -> Self {
        self.looping = self.looping.with_parallel(threads);
        self
    }

    /// Stop after `max` failed iterations.
    #[must_use]
    pub fn with_max_failed_loops(mut self, max: u64) -> Self {
        self.looping.max_failed_loops = Some(DynamicValue::literal(max));
        self
    }

    /// Cap the iteration count.
    #[must_use]
    pub fn with_max_loops(mut self, max: u64) -> Self {
        self.looping.max_loops = Some(DynamicValue::literal(max));
        self
    }
}

impl ForEachParams {
    /// Iterate the pool identified by `kind` and `config`.
    #[must_use]
    pub fn new(kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            source: DataSourceSpec {
                kind: kind.into(),
                config: DynamicValue::literal(config),
            },
            item: "row".to_owned(),
            header: true,
            looping: LoopParams::default(),
        }
    }

    /// Rename the row variable.
    #[must_use]
    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = item.into();
        self
    }

    /// Bind rows as raw cells instead of header-keyed maps.
    #[must_use]
    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    /// Run on `threads` workers.
    #[must_use]
    pub fn with_parallel(mut self, threads: u64) -> Self {
        self.looping = self.looping.with_parallel(threads);
        self
    }

    /// Stop after `max` failed iterations.
    #[must_use]
    pub fn with_max_failed_loops(mut self, max: u64) -> Self {
        self.looping.max_failed_loops = Some(DynamicValue::literal(max));
        self
    }
}

impl LoopParams {
    /// Enable parallel mode on `threads` workers.
    #[must_use]
    pub fn with_parallel(mut self, threads: u64) -> Self {
        self.parallel = Some(DynamicValue::literal(true));
        self.threads = Some(DynamicValue::literal(threads));
        self
    }
}

impl ThreadGroupParams {
    /// `users` virtual users running `iterations` iterations each.
    #[must_use]
    pub fn new(users: u64, iterations: u64) -> Self {
        Self {
            users: Some(DynamicValue::literal(users)),
            iterations: Some(DynamicValue::literal(iterations)),
            ..Self::default()
        }
    }

    /// Set the ramp-up window.
    #[must_use]
    pub fn with_rampup(mut self, rampup_ms: u64) -> Self {
        self.rampup = Some(DynamicValue::literal(rampup_ms));
        self
    }

    /// Set the pacing.
    #[must_use]
    pub fn with_pacing(mut self, pacing_ms: u64) -> Self {
        self.pacing = Some(DynamicValue::literal(pacing_ms));
        self
    }

    /// Set the start offset.
    #[must_use]
    pub fn with_start_offset(mut self, offset_ms: u64) -> Self {
        self.start_offset = Some(DynamicValue::literal(offset_ms));
        self
    }

    /// Set the wall-clock cap.
    #[must_use]
    pub fn with_max_duration(mut self, duration_ms: u64) -> Self {
        self.max_duration = Some(DynamicValue::literal(duration_ms));
        self
    }

    /// Start users in packs of `pack`.
    #[must_use]
    pub fn with_pack(mut self, pack: u64) -> Self {
        self.pack = Some(DynamicValue::literal(pack));
        self
    }
}

impl RetryParams {
    /// Retry up to `max_retries` times, waiting `grace_period_ms` in between.
    #[must_use]
    pub fn new(max_retries: u64, grace_period_ms: u64) -> Self {
        Self {
            max_retries: Some(DynamicValue::literal(max_retries)),
            grace_period: Some(DynamicValue::literal(grace_period_ms)),
            timeout: None,
        }
    }

    /// Stop retrying after `timeout_ms`.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(DynamicValue::literal(timeout_ms));
        self
    }
}
