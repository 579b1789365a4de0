//! Typed intermediate representation for compiled state machines.
//!
//! The IR is the translator's output contract: every variant carries enough
//! information for a downstream serializer to render the Amazon States
//! Language JSON shape, but edges are plain state keys rather than object
//! references so the graph stays serializable and acyclic in the value
//! domain.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::tasks::{Service, TaskDefinition};

/// Everything collected from one project source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Compiled state machines keyed by function name.
    pub state_machines: BTreeMap<String, StateMachine>,
    /// Task definitions keyed by class name.
    pub tasks: BTreeMap<String, TaskDefinition>,
}

/// A compiled, linked state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachine {
    /// State machine name, from the defining function.
    pub name: String,
    /// The linked top-level sub-machine.
    pub machine: SubMachine,
    /// Cron or rate expression from `@schedule`.
    pub schedule_expression: Option<String>,
    /// Topic subscriptions from `@subscribe`.
    pub subscriptions: Vec<Subscription>,
    /// Whether the machine is exported for external deployment.
    pub exported: bool,
}

impl StateMachine {
    /// True when this machine can be executed directly: it is exported or it
    /// is the project's `main` machine.
    pub fn is_executable(&self) -> bool {
        self.exported || self.name == "main"
    }
}

/// Subscription metadata attached by `@subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Name of another project to subscribe to.
    pub project: Option<String>,
    /// State machine within that project; defaults to `main`.
    pub state_machine: String,
    /// Which execution outcome triggers this machine.
    pub status: SubscriptionStatus,
    /// Explicit topic ARN import value, as an alternative to `project`.
    pub topic_arn_import_value: Option<String>,
}

/// Execution outcome a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// Trigger on successful executions.
    Success,
    /// Trigger on failed executions.
    Failure,
}

/// An isolated `{start_key, states}` scope: the top-level machine, a Map
/// iterator, or a Parallel branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMachine {
    /// Key of the state execution starts at.
    pub start_key: String,
    /// States keyed by their unique key, in document order.
    pub states: IndexMap<String, State>,
}

impl SubMachine {
    /// Look up a state by key.
    pub fn get(&self, key: &str) -> Option<&State> {
        self.states.get(key)
    }

    /// The start state. Every linked sub-machine has one.
    pub fn start(&self) -> Option<&State> {
        self.states.get(&self.start_key)
    }
}

/// A single state in a sub-machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Unique key within the enclosing sub-machine.
    pub key: String,
    /// Optional human-readable comment.
    pub comment: Option<String>,
    /// Outgoing edge; `None` for terminal kinds.
    pub transition: Option<Transition>,
    /// The state's type-specific payload.
    pub kind: StateKind,
}

impl State {
    /// True for kinds that never carry an outgoing edge.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StateKind::Succeed | StateKind::Fail(_) | StateKind::Choice(_)
        )
    }

    /// The `Next` target key, when the state has one.
    pub fn next_key(&self) -> Option<&str> {
        match &self.transition {
            Some(Transition::Next(key)) => Some(key.as_str()),
            _ => None,
        }
    }
}

/// Where control flows after a non-terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transition {
    /// Continue at the named state.
    Next(String),
    /// End the enclosing sub-machine.
    End,
}

/// Type-specific payload of a [`State`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateKind {
    /// Invoke a user task.
    Task(TaskState),
    /// Branch on compiled predicates.
    Choice(ChoiceState),
    /// Fan out an iterator sub-machine over a list.
    Map(MapState),
    /// Run branch sub-machines concurrently.
    Parallel(ParallelState),
    /// Inject a literal payload into the data document.
    Pass(PassState),
    /// Pause for a duration or until a timestamp.
    Wait(WaitState),
    /// Terminal success.
    Succeed,
    /// Terminal failure with an error name.
    Fail(FailState),
}

/// Task state payload.
///
/// `resource` and `parameters` are computed by the service-specific task
/// family at build time; everything else reflects the call site and the task
/// class attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Name of the task class this state invokes.
    pub task_name: String,
    /// The task's service integration.
    pub service: Service,
    /// Computed ASL `Resource` value.
    pub resource: String,
    /// Computed ASL `Parameters` template.
    pub parameters: Value,
    /// Path the task reads its input from; `$` for the whole document.
    pub input_path: String,
    /// Path the result is assigned to; `None` discards the result.
    pub result_path: Option<String>,
    /// State timeout in seconds.
    pub timeout_seconds: u32,
    /// Heartbeat interval for wait-for-token tasks.
    pub heartbeat_seconds: Option<u32>,
    /// Retry policies in evaluation order.
    pub retry: Vec<Retry>,
    /// Catch clauses in evaluation order.
    pub catch: Vec<Catch>,
}

/// Choice state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
    /// Branches evaluated in document order.
    pub branches: Vec<ChoiceBranch>,
    /// Key of the state taken when no branch matches.
    pub default: String,
}

/// One compiled branch of a Choice state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceBranch {
    /// The compiled predicate tree.
    pub rule: ChoiceRule,
    /// Key of the state taken when the rule matches.
    pub next: String,
}

/// Map state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    /// Path of the list to fan out over.
    pub items_path: String,
    /// Path the collected results are assigned to; `None` discards them.
    pub result_path: Option<String>,
    /// Concurrent iteration limit; `None` leaves it to the service default.
    pub max_concurrency: Option<u32>,
    /// The iterator sub-machine run per item.
    pub iterator: SubMachine,
}

/// Parallel state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelState {
    /// Branch sub-machines, in call order.
    pub branches: Vec<SubMachine>,
}

/// Pass state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassState {
    /// Literal result payload, if any.
    pub result: Option<Value>,
    /// Path the payload is assigned to; `$` replaces the whole document.
    pub result_path: Option<String>,
}

/// Wait state payload: exactly one of the four ASL wait forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WaitState {
    /// Wait a literal number of seconds.
    Seconds(u32),
    /// Wait the number of seconds found at a data path.
    SecondsPath(String),
    /// Wait until a literal RFC 3339 timestamp.
    Timestamp(String),
    /// Wait until the timestamp found at a data path.
    TimestampPath(String),
}

/// Fail state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailState {
    /// Error name surfaced to the execution.
    pub error: String,
    /// Optional human-readable cause.
    pub cause: Option<String>,
}

/// Retry policy attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retry {
    /// Error names this policy matches; `States.ALL` matches everything.
    pub error_equals: Vec<String>,
    /// Seconds before the first retry attempt.
    pub interval_seconds: u32,
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Multiplier applied to the interval after each attempt.
    pub backoff_rate: f64,
}

/// Catch clause attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catch {
    /// Error names this clause matches; `States.ALL` matches everything.
    pub error_equals: Vec<String>,
    /// Key of the handler state.
    pub next: String,
}

/// A compiled predicate tree for a Choice branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChoiceRule {
    /// All sub-rules must match.
    And(Vec<ChoiceRule>),
    /// At least one sub-rule must match.
    Or(Vec<ChoiceRule>),
    /// The sub-rule must not match.
    Not(Box<ChoiceRule>),
    /// A typed comparison between a data path and a value.
    Compare {
        /// Data path of the left operand.
        variable: String,
        /// The typed ASL comparator.
        op: CompareOp,
        /// Right operand.
        value: CompareValue,
    },
    /// The data path holds JSON `null`.
    IsNull {
        /// Data path tested for null.
        variable: String,
    },
}

/// Typed ASL comparison operators emitted by the expression compiler.
///
/// When the compared value is a [`CompareValue::Path`], the serializer
/// renders the `…Path` variant of the operator (`NumericEqualsPath` and so
/// on); [`CompareOp::asl_name`] returns the base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CompareOp {
    StringEquals,
    StringLessThan,
    StringGreaterThan,
    StringLessThanEquals,
    StringGreaterThanEquals,
    NumericEquals,
    NumericLessThan,
    NumericGreaterThan,
    NumericLessThanEquals,
    NumericGreaterThanEquals,
    BooleanEquals,
}

impl CompareOp {
    /// The operator's name in the Amazon States Language.
    pub fn asl_name(&self) -> &'static str {
        match self {
            CompareOp::StringEquals => "StringEquals",
            CompareOp::StringLessThan => "StringLessThan",
            CompareOp::StringGreaterThan => "StringGreaterThan",
            CompareOp::StringLessThanEquals => "StringLessThanEquals",
            CompareOp::StringGreaterThanEquals => "StringGreaterThanEquals",
            CompareOp::NumericEquals => "NumericEquals",
            CompareOp::NumericLessThan => "NumericLessThan",
            CompareOp::NumericGreaterThan => "NumericGreaterThan",
            CompareOp::NumericLessThanEquals => "NumericLessThanEquals",
            CompareOp::NumericGreaterThanEquals => "NumericGreaterThanEquals",
            CompareOp::BooleanEquals => "BooleanEquals",
        }
    }
}

/// Right-hand operand of a compiled comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompareValue {
    /// String literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// Boolean literal.
    Bool(bool),
    /// Another data path; renders as the `…Path` operator family.
    Path(String),
}
