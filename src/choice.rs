//! Lowers host boolean expressions into typed ASL choice rules.
//!
//! The accepted grammar is `and`/`or`/`not` over single comparisons between
//! a `data[...]` reference and a literal (or a second, explicitly cast
//! reference). The operand type — cast first, literal type second, string
//! otherwise — picks the ASL operator family; `!=` and `is not` compile to
//! `Not`-wrapped equality rules, and nested homogeneous `and`/`or` trees are
//! flattened.

use crate::ast::{BoolOp, CmpOp, Expr, ExprKind, Span};
use crate::ir::{ChoiceRule, CompareOp, CompareValue};
use crate::{CompileError, Result};

/// Compile a branch test expression into a [`ChoiceRule`].
pub(crate) fn compile_condition(expr: &Expr) -> Result<ChoiceRule> {
    match &expr.kind {
        ExprKind::BoolOp { op, values } => {
            let mut rules = Vec::with_capacity(values.len());
            for value in values {
                let rule = compile_condition(value)?;
                // Merge nested homogeneous connectives: `a and (b and c)`
                // compiles to one three-way And.
                match (op, rule) {
                    (BoolOp::And, ChoiceRule::And(inner)) => rules.extend(inner),
                    (BoolOp::Or, ChoiceRule::Or(inner)) => rules.extend(inner),
                    (_, rule) => rules.push(rule),
                }
            }
            Ok(match op {
                BoolOp::And => ChoiceRule::And(rules),
                BoolOp::Or => ChoiceRule::Or(rules),
            })
        }
        ExprKind::Not(operand) => Ok(ChoiceRule::Not(Box::new(compile_condition(operand)?))),
        ExprKind::Compare { left, op, right } => comparison(left, *op, right, expr.span),
        ExprKind::Call { .. } => {
            // A bare truthiness test must be an explicit `bool(...)` cast.
            match operand(expr)? {
                Operand::Path {
                    path,
                    cast: Some(Cast::Bool),
                    ..
                } => Ok(ChoiceRule::Compare {
                    variable: path,
                    op: CompareOp::BooleanEquals,
                    value: CompareValue::Bool(true),
                }),
                _ => Err(CompileError::unsupported(
                    expr.span,
                    "bare conditions must be wrapped in `bool(...)`",
                )),
            }
        }
        _ => Err(CompileError::unsupported(
            expr.span,
            "conditional expressions must contain a comparison or boolean logic",
        )),
    }
}

/// Render a `data[...]` reference as a JSON path, e.g. `$['a'][0]`.
pub(crate) fn data_path(expr: &Expr) -> Result<String> {
    fn walk(expr: &Expr, out: &mut Vec<String>) -> Result<()> {
        match &expr.kind {
            ExprKind::Name(name) if name == "data" => Ok(()),
            ExprKind::Subscript { value, index } => {
                walk(value, out)?;
                match &index.kind {
                    ExprKind::Str(key) => out.push(format!("['{key}']")),
                    ExprKind::Int(idx) => out.push(format!("[{idx}]")),
                    _ => Err(CompileError::unsupported(
                        index.span,
                        "data subscripts must be string or integer literals",
                    ))?,
                }
                Ok(())
            }
            _ => Err(CompileError::unsupported(
                expr.span,
                "expected a subscript reference on `data`",
            )),
        }
    }
    let mut segments = Vec::new();
    walk(expr, &mut segments)?;
    Ok(format!("${}", segments.concat()))
}

/// True when the expression is a (possibly nested) subscript on `data`.
pub(crate) fn is_data_ref(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Subscript { value, .. } => {
            value.as_name() == Some("data") || is_data_ref(value)
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cast {
    Str,
    Int,
    Float,
    Bool,
}

impl Cast {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "str" => Some(Cast::Str),
            "int" => Some(Cast::Int),
            "float" => Some(Cast::Float),
            "bool" => Some(Cast::Bool),
            _ => None,
        }
    }

    fn family(&self) -> Family {
        match self {
            Cast::Str => Family::Str,
            Cast::Int | Cast::Float => Family::Num,
            Cast::Bool => Family::Bool,
        }
    }
}

/// ASL operator family a comparison resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Str,
    Num,
    Bool,
}

enum Operand {
    Path {
        path: String,
        cast: Option<Cast>,
        span: Span,
    },
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

fn operand(expr: &Expr) -> Result<Operand> {
    match &expr.kind {
        ExprKind::Subscript { .. } => Ok(Operand::Path {
            path: data_path(expr)?,
            cast: None,
            span: expr.span,
        }),
        ExprKind::Call { func, args, kwargs } => {
            let Some(cast) = func.as_name().and_then(Cast::parse) else {
                return Err(CompileError::unsupported(
                    expr.span,
                    "only the `str`, `int`, `float`, and `bool` casts may be called in \
                     conditions",
                ));
            };
            if args.len() != 1 || !kwargs.is_empty() {
                return Err(CompileError::unsupported(
                    expr.span,
                    "cast functions accept exactly one positional argument",
                ));
            }
            Ok(Operand::Path {
                path: data_path(&args[0])?,
                cast: Some(cast),
                span: expr.span,
            })
        }
        ExprKind::Str(value) => Ok(Operand::Str(value.clone())),
        ExprKind::Int(value) => Ok(Operand::Int(*value)),
        ExprKind::Float(value) => Ok(Operand::Float(*value)),
        ExprKind::Bool(value) => Ok(Operand::Bool(*value)),
        ExprKind::None => Ok(Operand::None),
        _ => Err(CompileError::unsupported(
            expr.span,
            "comparison operands must be `data[...]` references, casts, or literals",
        )),
    }
}

fn comparison(left: &Expr, op: CmpOp, right: &Expr, span: Span) -> Result<ChoiceRule> {
    let left_operand = operand(left)?;
    let right_operand = operand(right)?;

    // `is` / `is not` only exist for null tests.
    if matches!(op, CmpOp::Is | CmpOp::IsNot) {
        let Operand::None = right_operand else {
            return Err(CompileError::unsupported(
                span,
                "`is` comparisons are only supported against None",
            ));
        };
        let Operand::Path { path, cast: None, .. } = left_operand else {
            return Err(CompileError::unsupported(
                span,
                "`is None` applies to an uncast `data[...]` reference",
            ));
        };
        let rule = ChoiceRule::IsNull { variable: path };
        return Ok(match op {
            CmpOp::IsNot => ChoiceRule::Not(Box::new(rule)),
            _ => rule,
        });
    }

    let Operand::Path {
        path: variable,
        cast: left_cast,
        ..
    } = left_operand
    else {
        return Err(CompileError::unsupported(
            span,
            "the left side of a comparison must reference the input data",
        ));
    };

    let (family, value) = match right_operand {
        Operand::Str(text) => (Family::Str, CompareValue::Str(text)),
        Operand::Int(number) => (Family::Num, CompareValue::Int(number)),
        Operand::Float(number) => (Family::Num, CompareValue::Float(number)),
        Operand::Bool(flag) => (Family::Bool, CompareValue::Bool(flag)),
        Operand::None => {
            return Err(CompileError::unsupported(
                span,
                "compare against None with `is None` or `is not None`",
            ));
        }
        Operand::Path {
            path,
            cast: right_cast,
            span: right_span,
        } => {
            let Some(cast) = left_cast.or(right_cast) else {
                return Err(CompileError::unsupported(
                    right_span,
                    "comparing two data references requires an explicit cast on at least \
                     one side",
                ));
            };
            if let (Some(l), Some(r)) = (left_cast, right_cast) {
                if l.family() != r.family() {
                    return Err(CompileError::unsupported(
                        span,
                        "value types must match on both sides of a comparison",
                    ));
                }
            }
            (cast.family(), CompareValue::Path(path))
        }
    };

    if let Some(cast) = left_cast {
        if cast.family() != family {
            return Err(CompileError::unsupported(
                span,
                "value types must match on both sides of a comparison",
            ));
        }
    }

    let compare_op = operator_for(op, family, span)?;
    let rule = ChoiceRule::Compare {
        variable,
        op: compare_op,
        value,
    };
    Ok(match op {
        CmpOp::NotEq => ChoiceRule::Not(Box::new(rule)),
        _ => rule,
    })
}

fn operator_for(op: CmpOp, family: Family, span: Span) -> Result<CompareOp> {
    let mapped = match (family, op) {
        (Family::Str, CmpOp::Eq | CmpOp::NotEq) => Some(CompareOp::StringEquals),
        (Family::Str, CmpOp::Lt) => Some(CompareOp::StringLessThan),
        (Family::Str, CmpOp::Gt) => Some(CompareOp::StringGreaterThan),
        (Family::Str, CmpOp::LtE) => Some(CompareOp::StringLessThanEquals),
        (Family::Str, CmpOp::GtE) => Some(CompareOp::StringGreaterThanEquals),
        (Family::Num, CmpOp::Eq | CmpOp::NotEq) => Some(CompareOp::NumericEquals),
        (Family::Num, CmpOp::Lt) => Some(CompareOp::NumericLessThan),
        (Family::Num, CmpOp::Gt) => Some(CompareOp::NumericGreaterThan),
        (Family::Num, CmpOp::LtE) => Some(CompareOp::NumericLessThanEquals),
        (Family::Num, CmpOp::GtE) => Some(CompareOp::NumericGreaterThanEquals),
        (Family::Bool, CmpOp::Eq | CmpOp::NotEq) => Some(CompareOp::BooleanEquals),
        _ => None,
    };
    mapped.ok_or_else(|| {
        CompileError::unsupported(span, "this operator is not defined for the operand type")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn condition(test: &str) -> Result<ChoiceRule> {
        let source = format!("def main(data):\n    if {test}:\n        return\n");
        let module = parse_module(&source).expect("parse");
        let crate::ast::StmtKind::FunctionDef { body, .. } = &module.body[0].kind else {
            panic!("expected function");
        };
        let crate::ast::StmtKind::If { test, .. } = &body[0].kind else {
            panic!("expected if");
        };
        compile_condition(test)
    }

    #[test]
    fn numeric_comparison_from_literal_type() {
        let rule = condition("data[\"foo\"] > 10").expect("rule");
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['foo']".into(),
                op: CompareOp::NumericGreaterThan,
                value: CompareValue::Int(10),
            }
        );
    }

    #[test]
    fn string_comparison_by_default() {
        let rule = condition("data[\"foo\"] == \"bar\"").expect("rule");
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['foo']".into(),
                op: CompareOp::StringEquals,
                value: CompareValue::Str("bar".into()),
            }
        );
    }

    #[test]
    fn cast_drives_operator_family() {
        let rule = condition("int(data[\"foo\"]) < 10").expect("rule");
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['foo']".into(),
                op: CompareOp::NumericLessThan,
                value: CompareValue::Int(10),
            }
        );
    }

    #[test]
    fn bool_cast_compiles_to_boolean_equals_true() {
        let rule = condition("bool(data[\"flag\"])").expect("rule");
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['flag']".into(),
                op: CompareOp::BooleanEquals,
                value: CompareValue::Bool(true),
            }
        );
    }

    #[test]
    fn not_equal_wraps_equality() {
        let rule = condition("data[\"foo\"] != 3").expect("rule");
        let ChoiceRule::Not(inner) = rule else {
            panic!("expected Not, got {rule:?}");
        };
        assert_eq!(
            *inner,
            ChoiceRule::Compare {
                variable: "$['foo']".into(),
                op: CompareOp::NumericEquals,
                value: CompareValue::Int(3),
            }
        );
    }

    #[test]
    fn is_none_compiles_to_is_null() {
        let rule = condition("data[\"foo\"] is None").expect("rule");
        assert_eq!(
            rule,
            ChoiceRule::IsNull {
                variable: "$['foo']".into()
            }
        );
        let negated = condition("data[\"foo\"] is not None").expect("rule");
        assert!(matches!(negated, ChoiceRule::Not(_)));
    }

    #[test]
    fn nested_homogeneous_connectives_flatten() {
        let rule = condition(
            "data[\"a\"] > 1 and (data[\"b\"] > 2 and data[\"c\"] > 3)",
        )
        .expect("rule");
        let ChoiceRule::And(rules) = rule else {
            panic!("expected And, got {rule:?}");
        };
        assert_eq!(rules.len(), 3);
    }

    #[test]
    fn mixed_connectives_stay_nested() {
        let rule = condition("data[\"a\"] > 1 or data[\"b\"] > 2 and data[\"c\"] > 3")
            .expect("rule");
        let ChoiceRule::Or(rules) = rule else {
            panic!("expected Or, got {rule:?}");
        };
        assert_eq!(rules.len(), 2);
        assert!(matches!(rules[1], ChoiceRule::And(_)));
    }

    #[test]
    fn nested_subscripts_render_as_path_segments() {
        let rule = condition("data[\"a\"][\"b\"][0] == 1").expect("rule");
        let ChoiceRule::Compare { variable, .. } = rule else {
            panic!("expected compare");
        };
        assert_eq!(variable, "$['a']['b'][0]");
    }

    #[test]
    fn two_data_refs_require_a_cast() {
        let err = condition("data[\"a\"] == data[\"b\"]").unwrap_err();
        assert!(err.message().contains("explicit cast"));

        let rule = condition("int(data[\"a\"]) == data[\"b\"]").expect("rule");
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['a']".into(),
                op: CompareOp::NumericEquals,
                value: CompareValue::Path("$['b']".into()),
            }
        );
    }

    #[test]
    fn conflicting_casts_are_rejected() {
        let err = condition("int(data[\"a\"]) == str(data[\"b\"])").unwrap_err();
        assert!(err.message().contains("types must match"));
    }

    #[test]
    fn equality_against_none_is_rejected() {
        let err = condition("data[\"a\"] == None").unwrap_err();
        assert!(err.message().contains("is None"));
    }

    #[test]
    fn ordering_on_booleans_is_rejected() {
        let err = condition("data[\"a\"] < True").unwrap_err();
        assert!(err.message().contains("not defined"));
    }

    #[test]
    fn bare_reference_is_rejected() {
        let err = condition("data[\"a\"]").unwrap_err();
        assert!(err.message().contains("comparison or boolean logic"));
    }

    #[test]
    fn cast_and_literal_must_agree() {
        let err = condition("int(data[\"a\"]) == \"x\"").unwrap_err();
        assert!(err.message().contains("types must match"));
    }
}
