//! Statement visitor: lowers a state-machine function body into fragments.
//!
//! The visitor walks statements in document order with explicit dispatch on
//! the statement kind. Each recognized shape produces zero or more
//! [`Fragment`]s; control-flow constructs carry their nested bodies along so
//! the linker can wire edges in a second pass. Map iterators and parallel
//! branches recurse through the project assembler into isolated
//! sub-machines.

use serde_json::Value;
use tracing::debug;

use crate::ast::{ExceptHandler, Expr, ExprKind, Span, Stmt, StmtKind};
use crate::choice::{compile_condition, data_path, is_data_ref};
use crate::diagnostics::DiagnosticKind;
use crate::ir::{
    ChoiceRule, FailState, MapState, ParallelState, PassState, Retry, State, StateKind, SubMachine,
    WaitState,
};
use crate::linker::{KeyGen, link};
use crate::project::{Assembler, Role};
use crate::tasks::create_task_state;
use crate::{CompileError, Result};

/// Input-data key reserved for tracing plumbing; never a legal result path.
pub(crate) const RESERVED_INPUT_KEY: &str = "__trace";

/// A pre-link fragment emitted by the visitor.
///
/// Simple statements become a single [`Fragment::State`]; `if` chains and
/// `try` blocks keep their nested bodies as fragment lists for the linker to
/// flatten into the enclosing `states` table.
#[derive(Debug)]
pub(crate) enum Fragment {
    /// A single state with its transition still unset.
    State {
        /// The emitted state.
        state: State,
        /// Source location, for collision reporting.
        span: Span,
    },
    /// An `if`/`elif`/`else` chain awaiting branch linking.
    Choice {
        /// Pre-assigned key of the Choice state.
        key: String,
        /// Compiled arms in document order.
        arms: Vec<ChoiceArm>,
        /// The `else` body, when present.
        otherwise: Option<Vec<Fragment>>,
        /// Source location of the `if`.
        span: Span,
    },
    /// A `try` body with its handlers, awaiting catch attachment.
    Guarded {
        /// Fragments of the guarded body.
        body: Vec<Fragment>,
        /// Exception handlers in document order.
        handlers: Vec<Handler>,
        /// Source location of the `try`.
        span: Span,
    },
}

/// One arm of a pre-link Choice fragment.
#[derive(Debug)]
pub(crate) struct ChoiceArm {
    /// Compiled predicate.
    pub rule: ChoiceRule,
    /// Arm body fragments.
    pub body: Vec<Fragment>,
    /// Source location of the branch.
    pub span: Span,
}

/// One handler of a pre-link Guarded fragment.
#[derive(Debug)]
pub(crate) struct Handler {
    /// Matched error names; `States.ALL` for a bare `except`.
    pub errors: Vec<String>,
    /// Handler body fragments.
    pub body: Vec<Fragment>,
    /// Source location of the `except`.
    pub span: Span,
}

/// Walks one state-machine function body and produces a linked sub-machine.
pub(crate) struct StatementVisitor<'a, 'p> {
    asm: &'p mut Assembler<'a>,
    keys: KeyGen,
    in_map_iterator: bool,
}

impl<'a, 'p> StatementVisitor<'a, 'p> {
    pub(crate) fn new(asm: &'p mut Assembler<'a>, in_map_iterator: bool) -> Self {
        Self {
            asm,
            keys: KeyGen::new(),
            in_map_iterator,
        }
    }

    /// Visit the whole body and link the result.
    pub(crate) fn run(mut self, body: &[Stmt]) -> Result<SubMachine> {
        let fragments = self.visit_body(body)?;
        link(fragments, &mut self.keys)
    }

    fn visit_body(&mut self, stmts: &[Stmt]) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();
        for stmt in stmts {
            if let Some(fragment) = self.visit_stmt(stmt)? {
                fragments.push(fragment);
            }
        }
        Ok(fragments)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<Option<Fragment>> {
        debug!(line = stmt.span.line, "visiting statement");
        match &stmt.kind {
            StmtKind::Assign { target, value } => self.visit_assign(target, value, stmt.span),
            StmtKind::Expr(expr) => self.visit_expr_stmt(expr, stmt.span),
            StmtKind::If { .. } => self.visit_if(stmt).map(Some),
            StmtKind::Try { body, handlers } => {
                self.visit_try(body, handlers, stmt.span).map(Some)
            }
            StmtKind::With { context, body } => {
                self.visit_with(context, body, stmt.span).map(Some)
            }
            StmtKind::Raise(exc) => self.visit_raise(exc.as_ref(), stmt.span).map(Some),
            StmtKind::Return(_) => {
                let key = self.keys.fresh("Succeed");
                Ok(Some(self.state(key, None, StateKind::Succeed, stmt.span)))
            }
            StmtKind::Pass => Ok(None),
            StmtKind::AugAssign { .. } => Err(CompileError::unsupported(
                stmt.span,
                "augmented assignment is not supported",
            )),
            StmtKind::Import { .. } => Err(CompileError::unsupported(
                stmt.span,
                "imports are only allowed at module level",
            )),
            StmtKind::FunctionDef { .. } | StmtKind::ClassDef { .. } => Err(
                CompileError::unsupported(stmt.span, "nested definitions are not supported"),
            ),
            StmtKind::AsyncFunctionDef { .. } => Err(CompileError::unsupported(
                stmt.span,
                "`async def` only appears as a task class `run` method",
            )),
        }
    }

    fn visit_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        span: Span,
    ) -> Result<Option<Fragment>> {
        if matches!(target.kind, ExprKind::Tuple(_)) {
            return Err(CompileError::unsupported(
                span,
                "value assignments can only target one variable",
            ));
        }
        if !is_data_ref(target) {
            return Err(CompileError::unsupported(
                span,
                "assignment targets must be a key on `data`",
            ));
        }
        let result_path = data_path(target)?;
        if result_path.contains(RESERVED_INPUT_KEY) {
            return Err(CompileError::shape(
                span,
                format!("the `{RESERVED_INPUT_KEY}` key is reserved and cannot be assigned"),
            ));
        }

        if let ExprKind::Call { func, .. } = &value.kind {
            if let Some(name) = func.as_name() {
                if name == "map" {
                    return self.lower_map(value, Some(result_path), span).map(Some);
                }
                if self.asm.task_definition(name).is_some() {
                    return self.lower_task(value, Some(result_path), span).map(Some);
                }
                return Err(self.unknown_callable(name, value.span));
            }
        }

        // Anything else must be a JSON literal for a Pass state.
        let result = json_literal(value)?;
        let key = self.keys.fresh("Pass");
        Ok(Some(self.state(
            key,
            None,
            StateKind::Pass(PassState {
                result: Some(result),
                result_path: Some(result_path),
            }),
            span,
        )))
    }

    fn visit_expr_stmt(&mut self, expr: &Expr, span: Span) -> Result<Option<Fragment>> {
        match &expr.kind {
            // A bare string statement is a docstring.
            ExprKind::Str(_) => Ok(None),
            ExprKind::Call { func, args, kwargs } => match &func.kind {
                ExprKind::Attribute { value, attr } => {
                    match (value.as_name(), attr.as_str()) {
                        (Some("data"), "update") => {
                            self.lower_update(args, kwargs, span).map(Some)
                        }
                        (Some("context"), "stop_execution") => {
                            self.lower_stop_execution(args, kwargs, span).map(Some)
                        }
                        _ => Err(CompileError::unsupported(
                            span,
                            "the only supported method calls are `data.update()` and \
                             `context.stop_execution()`",
                        )),
                    }
                }
                ExprKind::Name(name) => match name.as_str() {
                    "parallel" => self.lower_parallel(expr, span).map(Some),
                    "wait" => self.lower_wait(expr, span).map(Some),
                    "map" => self.lower_map(expr, None, span).map(Some),
                    _ => {
                        if self.asm.task_definition(name).is_some() {
                            self.lower_task(expr, None, span).map(Some)
                        } else {
                            Err(self.unknown_callable(name, span))
                        }
                    }
                },
                _ => Err(CompileError::unsupported(
                    span,
                    "expression statements must be calls",
                )),
            },
            _ => Err(CompileError::unsupported(
                span,
                "supported expressions include task calls, `data.update()`, `parallel()`, \
                 `map()`, and `wait()`",
            )),
        }
    }

    fn unknown_callable(&self, name: &str, span: Span) -> CompileError {
        if self.asm.has_function(name) {
            CompileError::unsupported(
                span,
                format!(
                    "`{name}` is a state-machine function; it can only be used as a map \
                     iterator or parallel branch"
                ),
            )
        } else if name.starts_with(|ch: char| ch.is_ascii_uppercase()) {
            CompileError::reference(
                span,
                format!("task class `{name}` is not defined at module scope"),
            )
        } else {
            CompileError::unsupported(
                span,
                format!(
                    "unknown callable `{name}`; supported expressions include task calls, \
                     `data.update()`, `parallel()`, `map()`, and `wait()`"
                ),
            )
        }
    }

    fn visit_if(&mut self, stmt: &Stmt) -> Result<Fragment> {
        let key = self.keys.fresh("Choice");
        let span = stmt.span;
        let mut arms = Vec::new();
        let mut otherwise = None;
        let mut current = stmt;
        loop {
            let StmtKind::If { test, body, orelse } = &current.kind else {
                unreachable!("if chain holds only If statements");
            };
            let rule = compile_condition(test)?;
            let body = self.visit_body(body)?;
            arms.push(ChoiceArm {
                rule,
                body,
                span: current.span,
            });
            match orelse.as_slice() {
                [next] if matches!(next.kind, StmtKind::If { .. }) => current = next,
                [] => break,
                rest => {
                    otherwise = Some(self.visit_body(rest)?);
                    break;
                }
            }
        }
        debug!(key = %key, arms = arms.len(), "lowered choice state");
        Ok(Fragment::Choice {
            key,
            arms,
            otherwise,
            span,
        })
    }

    fn visit_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        span: Span,
    ) -> Result<Fragment> {
        let body = self.visit_body(body)?;
        let mut lowered = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let errors = if handler.errors.is_empty() {
                vec!["States.ALL".to_string()]
            } else {
                handler.errors.clone()
            };
            lowered.push(Handler {
                errors,
                body: self.visit_body(&handler.body)?,
                span: handler.span,
            });
        }
        Ok(Fragment::Guarded {
            body,
            handlers: lowered,
            span,
        })
    }

    fn visit_with(&mut self, context: &Expr, body: &[Stmt], span: Span) -> Result<Fragment> {
        let ExprKind::Call { func, args, kwargs } = &context.kind else {
            return Err(CompileError::unsupported(
                span,
                "supported context managers include `retry()`",
            ));
        };
        if func.as_name() != Some("retry") {
            return Err(CompileError::unsupported(
                span,
                "supported context managers include `retry()`",
            ));
        }
        if !args.is_empty() {
            return Err(CompileError::unsupported(
                context.span,
                "`retry()` only accepts keyword arguments",
            ));
        }
        let retry = parse_retry(kwargs)?;

        let mut fragments = self.visit_body(body)?;
        if fragments.len() != 1 {
            return Err(CompileError::shape(
                span,
                "the retry context manager can only wrap a single task statement",
            ));
        }
        let fragment = fragments.pop().expect("one fragment");
        let Fragment::State { mut state, span: state_span } = fragment else {
            return Err(CompileError::shape(
                span,
                "the retry context manager can only wrap a task call",
            ));
        };
        let StateKind::Task(task) = &mut state.kind else {
            return Err(CompileError::shape(
                span,
                "the retry context manager can only wrap a task call",
            ));
        };
        task.retry.push(retry);
        Ok(Fragment::State {
            state,
            span: state_span,
        })
    }

    fn visit_raise(&mut self, exc: Option<&Expr>, span: Span) -> Result<Fragment> {
        let Some(exc) = exc else {
            return Err(CompileError::unsupported(
                span,
                "bare `raise` is not supported; name an exception class",
            ));
        };
        let (error, cause) = match &exc.kind {
            ExprKind::Name(name) => (name.clone(), None),
            ExprKind::Call { func, args, kwargs } => {
                let Some(name) = func.as_name() else {
                    return Err(CompileError::unsupported(
                        exc.span,
                        "raised exceptions must name an exception class",
                    ));
                };
                if !kwargs.is_empty() || args.len() > 1 {
                    return Err(CompileError::unsupported(
                        exc.span,
                        "exception arguments must be a single string literal",
                    ));
                }
                let cause = match args.first().map(|arg| &arg.kind) {
                    None => None,
                    Some(ExprKind::Str(text)) => Some(text.clone()),
                    Some(_) => {
                        return Err(CompileError::unsupported(
                            exc.span,
                            "exception arguments must be a single string literal",
                        ));
                    }
                };
                (name.to_string(), cause)
            }
            _ => {
                return Err(CompileError::unsupported(
                    exc.span,
                    "raised exceptions must name an exception class",
                ));
            }
        };
        let key = self.keys.fresh("Fail");
        Ok(self.state(key, None, StateKind::Fail(FailState { error, cause }), span))
    }

    fn lower_task(
        &mut self,
        call: &Expr,
        result_path: Option<String>,
        span: Span,
    ) -> Result<Fragment> {
        let ExprKind::Call { func, args, kwargs } = &call.kind else {
            unreachable!("task lowering is only called on calls");
        };
        let name = func.as_name().expect("task calls are name calls");
        let def = self
            .asm
            .task_definition(name)
            .expect("caller checked the task exists")
            .clone();

        let input_path = match args.as_slice() {
            [] => "$".to_string(),
            [arg] => {
                if !is_data_ref(arg) {
                    return Err(CompileError::unsupported(
                        arg.span,
                        "task input must be a subscript on `data`",
                    ));
                }
                data_path(arg)?
            }
            _ => {
                return Err(CompileError::unsupported(
                    span,
                    "task calls accept at most one positional argument",
                ));
            }
        };

        let mut key = None;
        let mut comment = None;
        let mut timeout = None;
        for (kw, value) in kwargs {
            match kw.as_str() {
                "key" => key = Some(expect_str_kwarg(value, "key")?),
                "comment" => comment = Some(expect_str_kwarg(value, "comment")?),
                "timeout" => timeout = Some(expect_positive_kwarg(value, "timeout")?),
                other => {
                    return Err(CompileError::attribute(
                        value.span,
                        format!(
                            "invalid keyword argument `{other}`. Options: key, timeout, comment"
                        ),
                    ));
                }
            }
        }

        let result_path = if result_path.is_some() && !def.service.returns_result() {
            self.asm.diagnostics.warn(
                DiagnosticKind::Shape,
                span,
                format!(
                    "{} tasks cannot return a value; the assignment is discarded",
                    def.service.as_str()
                ),
            );
            None
        } else {
            result_path
        };

        let task = create_task_state(&def, &input_path, result_path, timeout, self.in_map_iterator);
        let key = key.unwrap_or_else(|| self.keys.fresh("Task"));
        Ok(self.state(key, comment, StateKind::Task(task), span))
    }

    fn lower_map(
        &mut self,
        call: &Expr,
        result_path: Option<String>,
        span: Span,
    ) -> Result<Fragment> {
        let ExprKind::Call { args, kwargs, .. } = &call.kind else {
            unreachable!("map lowering is only called on calls");
        };
        let [items, iterator] = args.as_slice() else {
            return Err(CompileError::shape(
                span,
                "`map` requires two arguments: a list of items from `data` and an iterator \
                 function",
            ));
        };
        if !is_data_ref(items) {
            return Err(CompileError::shape(
                items.span,
                "`map` items must be a subscript on `data`",
            ));
        }
        let items_path = data_path(items)?;
        let Some(iterator_name) = iterator.as_name() else {
            return Err(CompileError::shape(
                iterator.span,
                "the `map` iterator must name a function defined at module scope",
            ));
        };

        let mut key = None;
        let mut comment = None;
        let mut max_concurrency = None;
        for (kw, value) in kwargs {
            match kw.as_str() {
                "key" => key = Some(expect_str_kwarg(value, "key")?),
                "comment" => comment = Some(expect_str_kwarg(value, "comment")?),
                "max_concurrency" => {
                    max_concurrency = Some(expect_nonnegative_kwarg(value, "max_concurrency")?)
                }
                other => {
                    return Err(CompileError::attribute(
                        value.span,
                        format!(
                            "invalid keyword argument `{other}`. Options: key, comment, \
                             max_concurrency"
                        ),
                    ));
                }
            }
        }

        let iterator = self
            .asm
            .sub_machine(iterator_name, Role::MapIterator, iterator.span)?;
        let key = key.unwrap_or_else(|| self.keys.fresh("Map"));
        Ok(self.state(
            key,
            comment,
            StateKind::Map(MapState {
                items_path,
                result_path,
                max_concurrency,
                iterator,
            }),
            span,
        ))
    }

    fn lower_parallel(&mut self, call: &Expr, span: Span) -> Result<Fragment> {
        let ExprKind::Call { args, kwargs, .. } = &call.kind else {
            unreachable!("parallel lowering is only called on calls");
        };
        if args.is_empty() {
            return Err(CompileError::shape(
                span,
                "at least one branch function must be provided to the parallel state",
            ));
        }
        let mut key = None;
        let mut comment = None;
        for (kw, value) in kwargs {
            match kw.as_str() {
                "key" => key = Some(expect_str_kwarg(value, "key")?),
                "comment" => comment = Some(expect_str_kwarg(value, "comment")?),
                other => {
                    return Err(CompileError::attribute(
                        value.span,
                        format!("invalid keyword argument `{other}`. Options: key, comment"),
                    ));
                }
            }
        }
        let mut branches = Vec::with_capacity(args.len());
        for arg in args {
            let Some(name) = arg.as_name() else {
                return Err(CompileError::reference(
                    arg.span,
                    "only functions defined at module scope can be parallel branches",
                ));
            };
            branches.push(self.asm.sub_machine(name, Role::ParallelBranch, arg.span)?);
        }
        let key = key.unwrap_or_else(|| self.keys.fresh("Parallel"));
        Ok(self.state(
            key,
            comment,
            StateKind::Parallel(ParallelState { branches }),
            span,
        ))
    }

    fn lower_wait(&mut self, call: &Expr, span: Span) -> Result<Fragment> {
        let ExprKind::Call { args, kwargs, .. } = &call.kind else {
            unreachable!("wait lowering is only called on calls");
        };
        if !args.is_empty() {
            return Err(CompileError::unsupported(
                span,
                "`wait` only accepts keyword arguments",
            ));
        }
        let mut key = None;
        let mut comment = None;
        let mut wait = None;
        for (kw, value) in kwargs {
            match kw.as_str() {
                "key" => key = Some(expect_str_kwarg(value, "key")?),
                "comment" => comment = Some(expect_str_kwarg(value, "comment")?),
                "seconds" => {
                    wait = Some(if is_data_ref(value) {
                        WaitState::SecondsPath(data_path(value)?)
                    } else {
                        WaitState::Seconds(expect_positive_kwarg(value, "seconds")?)
                    });
                }
                "timestamp" => {
                    wait = Some(if is_data_ref(value) {
                        WaitState::TimestampPath(data_path(value)?)
                    } else {
                        WaitState::Timestamp(expect_str_kwarg(value, "timestamp")?)
                    });
                }
                other => {
                    return Err(CompileError::unsupported(
                        value.span,
                        format!(
                            "invalid keyword argument `{other}`. Valid keyword arguments: \
                             seconds, timestamp, key, comment"
                        ),
                    ));
                }
            }
        }
        let count = kwargs
            .iter()
            .filter(|(kw, _)| kw == "seconds" || kw == "timestamp")
            .count();
        if count != 1 {
            return Err(CompileError::shape(
                span,
                "`wait` requires exactly one of `seconds` or `timestamp`",
            ));
        }
        let wait = wait.expect("checked above");
        let key = key.unwrap_or_else(|| self.keys.fresh("Wait"));
        Ok(self.state(key, comment, StateKind::Wait(wait), span))
    }

    fn lower_update(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        span: Span,
    ) -> Result<Fragment> {
        if args.len() != 1 || !kwargs.is_empty() {
            return Err(CompileError::unsupported(
                span,
                "`data.update()` takes a single dict literal",
            ));
        }
        let arg = &args[0];
        if !matches!(arg.kind, ExprKind::Dict(_)) {
            return Err(CompileError::unsupported(
                arg.span,
                "`data.update()` takes a single dict literal",
            ));
        }
        let result = json_literal(arg)?;
        let key = self.keys.fresh("Pass");
        Ok(self.state(
            key,
            None,
            StateKind::Pass(PassState {
                result: Some(result),
                result_path: Some("$".to_string()),
            }),
            span,
        ))
    }

    fn lower_stop_execution(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        span: Span,
    ) -> Result<Fragment> {
        if !args.is_empty() {
            return Err(CompileError::unsupported(
                span,
                "`context.stop_execution()` only accepts keyword arguments",
            ));
        }
        let mut error = None;
        let mut cause = None;
        for (kw, value) in kwargs {
            match kw.as_str() {
                "error" => error = Some(expect_str_kwarg(value, "error")?),
                "cause" => cause = Some(expect_str_kwarg(value, "cause")?),
                other => {
                    return Err(CompileError::unsupported(
                        value.span,
                        format!("invalid keyword argument `{other}`. Options: error, cause"),
                    ));
                }
            }
        }
        let Some(error) = error else {
            return Err(CompileError::shape(
                span,
                "`context.stop_execution()` requires an `error` argument",
            ));
        };
        let key = self.keys.fresh("Fail");
        Ok(self.state(key, None, StateKind::Fail(FailState { error, cause }), span))
    }

    fn state(&self, key: String, comment: Option<String>, kind: StateKind, span: Span) -> Fragment {
        Fragment::State {
            state: State {
                key,
                comment,
                transition: None,
                kind,
            },
            span,
        }
    }
}

/// Parse the keyword arguments of a `retry()` context manager.
fn parse_retry(kwargs: &[(String, Expr)]) -> Result<Retry> {
    let mut retry = Retry {
        error_equals: vec!["States.ALL".to_string()],
        interval_seconds: 1,
        max_attempts: 3,
        backoff_rate: 2.0,
    };
    for (kw, value) in kwargs {
        match kw.as_str() {
            "on_exceptions" => {
                let ExprKind::List(items) = &value.kind else {
                    return Err(CompileError::attribute(
                        value.span,
                        "invalid data type for the `on_exceptions` option: expected a list",
                    ));
                };
                let mut errors = Vec::with_capacity(items.len());
                for item in items {
                    match &item.kind {
                        ExprKind::Name(name) => errors.push(name.clone()),
                        ExprKind::Str(name) => errors.push(name.clone()),
                        ExprKind::Attribute { value, attr }
                            if value.as_name() == Some("States") =>
                        {
                            errors.push(format!("States.{attr}"))
                        }
                        _ => {
                            return Err(CompileError::attribute(
                                item.span,
                                "`on_exceptions` entries must name exception classes",
                            ));
                        }
                    }
                }
                retry.error_equals = errors;
            }
            "interval" => retry.interval_seconds = expect_positive_kwarg(value, "interval")?,
            "max_attempts" => {
                retry.max_attempts = expect_nonnegative_kwarg(value, "max_attempts")?
            }
            "backoff_rate" => match value.kind {
                ExprKind::Float(rate) if rate > 0.0 => retry.backoff_rate = rate,
                ExprKind::Int(rate) if rate > 0 => retry.backoff_rate = rate as f64,
                _ => {
                    return Err(CompileError::attribute(
                        value.span,
                        "invalid data type for the `backoff_rate` option: expected a number",
                    ));
                }
            },
            other => {
                return Err(CompileError::attribute(
                    value.span,
                    format!(
                        "invalid keyword argument `{other}`. Options: on_exceptions, \
                         interval, max_attempts, backoff_rate"
                    ),
                ));
            }
        }
    }
    Ok(retry)
}

/// Convert a literal expression into a JSON value for a Pass result.
fn json_literal(expr: &Expr) -> Result<Value> {
    match &expr.kind {
        ExprKind::Str(text) => Ok(Value::String(text.clone())),
        ExprKind::Int(number) => Ok(Value::from(*number)),
        ExprKind::Float(number) => Ok(Value::from(*number)),
        ExprKind::Bool(flag) => Ok(Value::Bool(*flag)),
        ExprKind::None => Ok(Value::Null),
        ExprKind::List(items) => Ok(Value::Array(
            items.iter().map(json_literal).collect::<Result<_>>()?,
        )),
        ExprKind::Dict(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                let ExprKind::Str(key) = &key.kind else {
                    return Err(CompileError::unsupported(
                        key.span,
                        "dict keys must be string literals",
                    ));
                };
                object.insert(key.clone(), json_literal(value)?);
            }
            Ok(Value::Object(object))
        }
        _ => Err(CompileError::unsupported(
            expr.span,
            "values set on `data` must be JSON-serializable literals",
        )),
    }
}

fn expect_str_kwarg(expr: &Expr, name: &str) -> Result<String> {
    match &expr.kind {
        ExprKind::Str(text) => Ok(text.clone()),
        _ => Err(CompileError::attribute(
            expr.span,
            format!("invalid data type for the `{name}` option: expected a string"),
        )),
    }
}

fn expect_positive_kwarg(expr: &Expr, name: &str) -> Result<u32> {
    match expr.kind {
        ExprKind::Int(value) if value > 0 => u32::try_from(value).map_err(|_| {
            CompileError::attribute(expr.span, format!("`{name}` value {value} is out of range"))
        }),
        _ => Err(CompileError::attribute(
            expr.span,
            format!("invalid data type for the `{name}` option: expected a positive integer"),
        )),
    }
}

fn expect_nonnegative_kwarg(expr: &Expr, name: &str) -> Result<u32> {
    match expr.kind {
        ExprKind::Int(value) if value >= 0 => u32::try_from(value).map_err(|_| {
            CompileError::attribute(expr.span, format!("`{name}` value {value} is out of range"))
        }),
        _ => Err(CompileError::attribute(
            expr.span,
            format!("invalid data type for the `{name}` option: expected an integer"),
        )),
    }
}
