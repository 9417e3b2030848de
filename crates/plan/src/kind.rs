//! Node kinds and their typed parameters.
//!
//! Every numeric duration parameter is expressed in milliseconds. Optional
//! parameters fall back to engine defaults when absent.

use std::collections::BTreeMap;

use arbor_core::PlanNodeId;
use serde::{Deserialize, Serialize};

use crate::value::DynamicValue;

/// The kind of a plan node together with its kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Runs children in declaration order.
    Sequence(SequenceParams),
    /// Children run before the main children of the enclosing composite.
    BeforeSequence,
    /// Children run after the main children of the enclosing composite.
    AfterSequence,
    /// Runs the first child when the condition holds, the second otherwise.
    If(IfParams),
    /// Dispatches to the [`NodeKind::Case`] child matching the expression.
    Switch(SwitchParams),
    /// One branch of a [`NodeKind::Switch`].
    Case(CaseParams),
    /// Iterates an integer range.
    For(ForParams),
    /// Iterates the rows of a data pool.
    ForEach(ForEachParams),
    /// Load generation across concurrent virtual users.
    ThreadGroup(ThreadGroupParams),
    /// Children run once per virtual user before its first iteration.
    BeforeThread,
    /// Children run once per virtual user after its last iteration.
    AfterThread,
    /// Re-executes its body while it fails.
    RetryIfFails(RetryParams),
    /// Polls a condition until it holds or a limit is reached.
    WaitAndPoll(WaitAndPollParams),
    /// Runs children inside a private variable scope frame.
    Session,
    /// Binds a value in the innermost scope frame.
    Set(SetParams),
    /// Binds a selected value visible to siblings and children.
    Select(SelectParams),
    /// Publishes a terminal value for the enclosing unit.
    Return(ReturnParams),
    /// Invokes a keyword through the function execution service.
    CallFunction(CallFunctionParams),
    /// Runs a reusable sub-plan.
    CallPlan(CallPlanParams),
    /// Evaluates a boolean expression.
    Check(CheckParams),
    /// Checks the output of the enclosing keyword call.
    Assert(AssertParams),
    /// Logs and records an evaluated text.
    Echo(EchoParams),
    /// Sleeps for a fixed duration.
    Sleep(SleepParams),
    /// Runs children under a named lock.
    Synchronized(SynchronizedParams),
    /// Groups test steps; runs children sequentially.
    TestCase,
    /// Runs all children concurrently.
    TestScenario,
    /// Runs children on a bounded worker pool.
    TestSet(TestSetParams),
    /// A node handled by a handler registered under `handler`.
    Custom {
        /// Registry key of the handler.
        handler: String,
        /// Free-form handler parameters.
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl NodeKind {
    /// Registry key for this kind.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Sequence(_) => "sequence",
            Self::BeforeSequence => "before_sequence",
            Self::AfterSequence => "after_sequence",
            Self::If(_) => "if",
            Self::Switch(_) => "switch",
            Self::Case(_) => "case",
            Self::For(_) => "for",
            Self::ForEach(_) => "for_each",
            Self::ThreadGroup(_) => "thread_group",
            Self::BeforeThread => "before_thread",
            Self::AfterThread => "after_thread",
            Self::RetryIfFails(_) => "retry_if_fails",
            Self::WaitAndPoll(_) => "wait_and_poll",
            Self::Session => "session",
            Self::Set(_) => "set",
            Self::Select(_) => "select",
            Self::Return(_) => "return",
            Self::CallFunction(_) => "call_function",
            Self::CallPlan(_) => "call_plan",
            Self::Check(_) => "check",
            Self::Assert(_) => "assert",
            Self::Echo(_) => "echo",
            Self::Sleep(_) => "sleep",
            Self::Synchronized(_) => "synchronized",
            Self::TestCase => "test_case",
            Self::TestScenario => "test_scenario",
            Self::TestSet(_) => "test_set",
            Self::Custom { handler, .. } => handler,
        }
    }

    /// Whether the node's failure takes part in standard abort propagation.
    ///
    /// Local leaves and keyword calls are non-blocking.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        !matches!(
            self,
            Self::Set(_)
                | Self::Return(_)
                | Self::Check(_)
                | Self::Echo(_)
                | Self::Assert(_)
                | Self::CallFunction(_)
        )
    }

    /// Whether this kind never owns children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Self::Set(_)
                | Self::Return(_)
                | Self::Check(_)
                | Self::Echo(_)
                | Self::Assert(_)
                | Self::Sleep(_)
                | Self::WaitAndPoll(_)
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

fn default_true() -> DynamicValue {
    DynamicValue::literal(true)
}

/// Parameters of [`NodeKind::Sequence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceParams {
    /// Keep running siblings after a failed child.
    #[serde(default = "default_true")]
    pub continue_on_error: DynamicValue,
    /// Minimum wall-clock duration of the sequence.
    #[serde(default)]
    pub pacing: Option<DynamicValue>,
}

impl Default for SequenceParams {
    fn default() -> Self {
        Self {
            continue_on_error: default_true(),
            pacing: None,
        }
    }
}

/// Parameters of [`NodeKind::If`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfParams {
    /// Boolean condition, evaluated once.
    pub condition: DynamicValue,
}

/// Parameters of [`NodeKind::Switch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchParams {
    /// Expression compared against each case value.
    pub expression: DynamicValue,
}

/// Parameters of [`NodeKind::Case`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseParams {
    /// Value this case matches.
    pub value: DynamicValue,
}

/// Iteration limits shared by [`NodeKind::For`] and [`NodeKind::ForEach`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopParams {
    /// Cap on the number of iterations.
    #[serde(default)]
    pub max_loops: Option<DynamicValue>,
    /// Stop scheduling once this many iterations failed.
    #[serde(default)]
    pub max_failed_loops: Option<DynamicValue>,
    /// Run iterations on a worker pool.
    #[serde(default)]
    pub parallel: Option<DynamicValue>,
    /// Worker count in parallel mode.
    #[serde(default)]
    pub threads: Option<DynamicValue>,
}

fn default_counter() -> String {
    "counter".to_owned()
}

/// Parameters of [`NodeKind::For`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForParams {
    /// First value, inclusive. Defaults to 0.
    #[serde(default)]
    pub start: Option<DynamicValue>,
    /// Bound, exclusive. Unbounded when absent.
    #[serde(default)]
    pub end: Option<DynamicValue>,
    /// Step. Defaults to 1.
    #[serde(default)]
    pub inc: Option<DynamicValue>,
    /// Variable the current value is bound to.
    #[serde(default = "default_counter")]
    pub counter: String,
    /// Iteration limits.
    #[serde(flatten)]
    pub looping: LoopParams,
}

/// Identifies a data pool for [`NodeKind::ForEach`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Provider kind, e.g. `"inline"` or `"csv"`.
    pub kind: String,
    /// Provider configuration, evaluated before the pool is opened.
    #[serde(default)]
    pub config: DynamicValue,
}

fn default_row() -> String {
    "row".to_owned()
}

fn default_header() -> bool {
    true
}

/// Parameters of [`NodeKind::ForEach`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachParams {
    /// Where rows come from.
    pub source: DataSourceSpec,
    /// Variable each row is bound to.
    #[serde(default = "default_row")]
    pub item: String,
    /// Expose rows as header-keyed maps when the pool has headers.
    #[serde(default = "default_header")]
    pub header: bool,
    /// Iteration limits.
    #[serde(flatten)]
    pub looping: LoopParams,
}

/// Parameters of [`NodeKind::ThreadGroup`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadGroupParams {
    /// Number of virtual users. Defaults to 1.
    #[serde(default)]
    pub users: Option<DynamicValue>,
    /// Iterations per user; 0 means unbounded. Defaults to 1.
    #[serde(default)]
    pub iterations: Option<DynamicValue>,
    /// Window over which users are started. Defaults to `pacing`.
    #[serde(default)]
    pub rampup: Option<DynamicValue>,
    /// Minimum delay between iteration starts of one user.
    #[serde(default)]
    pub pacing: Option<DynamicValue>,
    /// Delay before the first user starts.
    #[serde(default)]
    pub start_offset: Option<DynamicValue>,
    /// Wall-clock cap for the whole group; 0 means unbounded.
    #[serde(default)]
    pub max_duration: Option<DynamicValue>,
    /// Users are started in packs of this size. Defaults to 1.
    #[serde(default)]
    pub pack: Option<DynamicValue>,
}

/// Parameters of [`NodeKind::RetryIfFails`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryParams {
    /// Additional attempts after the first. Defaults to 2.
    #[serde(default)]
    pub max_retries: Option<DynamicValue>,
    /// Delay between attempts. Defaults to 0.
    #[serde(default)]
    pub grace_period: Option<DynamicValue>,
    /// No attempt starts after this much time has elapsed.
    #[serde(default)]
    pub timeout: Option<DynamicValue>,
}

/// Parameters of [`NodeKind::WaitAndPoll`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitAndPollParams {
    /// Condition polled until it holds.
    pub condition: DynamicValue,
    /// Delay between polls.
    #[serde(default)]
    pub pacing: Option<DynamicValue>,
    /// Hard deadline for the whole poll.
    #[serde(default)]
    pub timeout: Option<DynamicValue>,
    /// Cap on the number of polls.
    #[serde(default)]
    pub max_iterations: Option<DynamicValue>,
}

/// Parameters of [`NodeKind::Set`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetParams {
    /// Variable name.
    pub key: DynamicValue,
    /// Value to bind.
    pub value: DynamicValue,
}

fn default_selected() -> String {
    "selected".to_owned()
}

/// Parameters of [`NodeKind::Select`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectParams {
    /// Variable the selection is bound to.
    #[serde(default = "default_selected")]
    pub key: String,
    /// Expression producing the selection, evaluated once.
    pub value: DynamicValue,
}

/// Parameters of [`NodeKind::Return`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnParams {
    /// Value published to the enclosing unit.
    #[serde(default)]
    pub output: DynamicValue,
}

/// Parameters of [`NodeKind::CallFunction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFunctionParams {
    /// Name of the keyword to call.
    pub function: DynamicValue,
    /// JSON object passed as the call input.
    #[serde(default)]
    pub arguments: Option<DynamicValue>,
    /// Token selection criteria: attribute name to regex.
    #[serde(default)]
    pub selection_criteria: BTreeMap<String, DynamicValue>,
    /// Upper bound on the call duration.
    #[serde(default)]
    pub timeout: Option<DynamicValue>,
}

/// Parameters of [`NodeKind::CallPlan`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallPlanParams {
    /// Sub-plan to run, by id.
    #[serde(default)]
    pub plan_id: Option<PlanNodeId>,
    /// Sub-plan to run, by name. Used when `plan_id` is absent.
    #[serde(default)]
    pub plan_name: Option<DynamicValue>,
    /// Value bound as `input` inside the sub-plan.
    #[serde(default)]
    pub input: Option<DynamicValue>,
}

/// Parameters of [`NodeKind::Check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckParams {
    /// Boolean expression.
    pub expression: DynamicValue,
}

/// Comparison performed by [`NodeKind::Assert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssertOperator {
    /// Values are equal.
    Equals,
    /// Actual contains expected.
    Contains,
    /// Actual starts with expected.
    BeginsWith,
    /// Actual ends with expected.
    EndsWith,
    /// Actual matches the expected regex.
    Matches,
    /// Actual is greater than expected.
    GreaterThan,
    /// Actual is greater than or equal to expected.
    GreaterThanOrEquals,
    /// Actual is less than expected.
    LessThan,
    /// Actual is less than or equal to expected.
    LessThanOrEquals,
    /// Actual is null.
    IsNull,
}

impl std::fmt::Display for AssertOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Equals => "equal to",
            Self::Contains => "contain",
            Self::BeginsWith => "begin with",
            Self::EndsWith => "end with",
            Self::Matches => "match",
            Self::GreaterThan => "greater than",
            Self::GreaterThanOrEquals => "greater than or equal to",
            Self::LessThan => "less than",
            Self::LessThanOrEquals => "less than or equal to",
            Self::IsNull => "null",
        };
        f.write_str(text)
    }
}

/// Parameters of [`NodeKind::Assert`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertParams {
    /// Output attribute, or a `$.a.b` path into the output.
    pub actual: String,
    /// Comparison to perform.
    pub operator: AssertOperator,
    /// Expected value.
    #[serde(default)]
    pub expected: DynamicValue,
    /// Invert the comparison.
    #[serde(default)]
    pub negate: bool,
    /// Replaces the generated failure message.
    #[serde(default)]
    pub custom_error_message: Option<DynamicValue>,
}

/// Parameters of [`NodeKind::Echo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoParams {
    /// Text to log.
    pub text: DynamicValue,
}

/// Parameters of [`NodeKind::Sleep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepParams {
    /// Sleep duration.
    pub duration: DynamicValue,
}

/// Parameters of [`NodeKind::Synchronized`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynchronizedParams {
    /// Lock name; nodes sharing a name exclude each other.
    #[serde(default)]
    pub lock_name: Option<DynamicValue>,
    /// Share the lock across every run of the engine.
    #[serde(default)]
    pub global: bool,
}

/// Parameters of [`NodeKind::TestSet`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSetParams {
    /// Worker count. Defaults to 1.
    #[serde(default)]
    pub threads: Option<DynamicValue>,
}
