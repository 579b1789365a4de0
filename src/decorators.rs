//! Processes the recognized state-machine function decorators.
//!
//! Exactly three decorators exist: `@schedule(...)`, `@subscribe(...)`, and
//! `@export()`. Scheduling or subscribing a machine implies exporting it;
//! anything else on the decorator list is a diagnostic.

use crate::ast::{Expr, ExprKind};
use crate::ir::{Subscription, SubscriptionStatus};
use crate::{CompileError, Result};

/// Metadata collected from a function's decorator list.
#[derive(Debug, Default)]
pub(crate) struct DecoratorMeta {
    /// Cron or rate expression from `@schedule`.
    pub schedule_expression: Option<String>,
    /// Subscriptions from `@subscribe`, in document order.
    pub subscriptions: Vec<Subscription>,
    /// Whether the machine is exported.
    pub exported: bool,
}

/// Interpret a decorator list into [`DecoratorMeta`].
pub(crate) fn process_decorators(decorators: &[Expr]) -> Result<DecoratorMeta> {
    let mut meta = DecoratorMeta::default();
    for decorator in decorators {
        let ExprKind::Call { func, args, kwargs } = &decorator.kind else {
            return Err(CompileError::decorator(
                decorator.span,
                "decorators must be called, e.g. `@export()`",
            ));
        };
        let Some(name) = func.as_name() else {
            return Err(CompileError::decorator(
                decorator.span,
                "supported decorators include: export, schedule, subscribe",
            ));
        };
        if !args.is_empty() {
            return Err(CompileError::decorator(
                decorator.span,
                format!("`@{name}` only accepts keyword arguments"),
            ));
        }
        match name {
            "schedule" => {
                if meta.schedule_expression.is_some() {
                    return Err(CompileError::decorator(
                        decorator.span,
                        "only one @schedule decorator can be applied to a state machine",
                    ));
                }
                meta.schedule_expression = Some(schedule_expression(decorator, kwargs)?);
                meta.exported = true;
            }
            "subscribe" => {
                meta.subscriptions.push(subscription(decorator, kwargs)?);
                meta.exported = true;
            }
            "export" => {
                if !kwargs.is_empty() {
                    return Err(CompileError::decorator(
                        decorator.span,
                        "`@export()` takes no arguments",
                    ));
                }
                meta.exported = true;
            }
            other => {
                return Err(CompileError::decorator(
                    decorator.span,
                    format!(
                        "unknown decorator `@{other}`; supported decorators include: export, \
                         schedule, subscribe"
                    ),
                ));
            }
        }
    }
    Ok(meta)
}

fn schedule_expression(decorator: &Expr, kwargs: &[(String, Expr)]) -> Result<String> {
    let mut expression = None;
    for (kw, value) in kwargs {
        match kw.as_str() {
            "expression" => expression = Some(string_option(value, "expression")?),
            other => {
                return Err(CompileError::decorator(
                    value.span,
                    format!("invalid keyword argument `{other}`. Options: expression"),
                ));
            }
        }
    }
    expression.ok_or_else(|| {
        CompileError::decorator(
            decorator.span,
            "the following options are required but were not provided: expression",
        )
    })
}

fn subscription(decorator: &Expr, kwargs: &[(String, Expr)]) -> Result<Subscription> {
    let mut project = None;
    let mut state_machine = None;
    let mut status = None;
    let mut topic_arn_import_value = None;
    for (kw, value) in kwargs {
        match kw.as_str() {
            "project" => project = Some(string_option(value, "project")?),
            "state_machine" => state_machine = Some(string_option(value, "state_machine")?),
            "status" => {
                status = Some(match string_option(value, "status")?.as_str() {
                    "success" => SubscriptionStatus::Success,
                    "failure" => SubscriptionStatus::Failure,
                    other => {
                        return Err(CompileError::decorator(
                            value.span,
                            format!("`status` must be \"success\" or \"failure\", found `{other}`"),
                        ));
                    }
                })
            }
            "topic_arn_import_value" => {
                topic_arn_import_value = Some(string_option(value, "topic_arn_import_value")?)
            }
            other => {
                return Err(CompileError::decorator(
                    value.span,
                    format!(
                        "invalid keyword argument `{other}`. Options: project, state_machine, \
                         status, topic_arn_import_value"
                    ),
                ));
            }
        }
    }
    if project.is_none() && topic_arn_import_value.is_none() {
        return Err(CompileError::decorator(
            decorator.span,
            "`@subscribe` requires either `project` or `topic_arn_import_value`",
        ));
    }
    Ok(Subscription {
        project,
        state_machine: state_machine.unwrap_or_else(|| "main".to_string()),
        status: status.unwrap_or(SubscriptionStatus::Success),
        topic_arn_import_value,
    })
}

fn string_option(expr: &Expr, name: &str) -> Result<String> {
    match &expr.kind {
        ExprKind::Str(value) => Ok(value.clone()),
        _ => Err(CompileError::decorator(
            expr.span,
            format!("invalid data type for the `{name}` option: expected a string"),
        )),
    }
}
