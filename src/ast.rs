use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a token, statement, or expression.
///
/// Lines and columns are 1-based, matching what editors display and what the
/// diagnostics stream reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl Span {
    /// Construct a span from a line/column pair.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A parsed project file: the ordered list of module-level statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module-level statements in document order.
    pub body: Vec<Stmt>,
}

/// A statement together with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// Location of the first token of the statement.
    pub span: Span,
    /// The statement shape.
    pub kind: StmtKind,
}

/// Statement shapes accepted by the reader.
///
/// This is the full surface the translator consumes; anything else is a parse
/// error. Whether a given shape is *legal* in a given position (module level,
/// state-machine body, task class body) is decided by the later passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `class Name(Base):` with its body.
    ClassDef {
        /// Class name.
        name: String,
        /// Base class names.
        bases: Vec<String>,
        /// Class body statements.
        body: Vec<Stmt>,
    },
    /// `def name(params):` with decorators and body.
    FunctionDef {
        /// Function name.
        name: String,
        /// Parameter names in order.
        params: Vec<String>,
        /// Decorator expressions, outermost first.
        decorators: Vec<Expr>,
        /// Function body statements.
        body: Vec<Stmt>,
    },
    /// `async def name(params):` whose body is captured verbatim.
    ///
    /// Task entry methods are opaque to the translator: the block is lifted
    /// as raw source for downstream packaging and never parsed.
    AsyncFunctionDef {
        /// Method name.
        name: String,
        /// Parameter names in order.
        params: Vec<String>,
        /// Verbatim body source with its location.
        body: TaskBody,
    },
    /// `target = value`.
    Assign {
        /// Assignment target expression.
        target: Expr,
        /// Assigned value expression.
        value: Expr,
    },
    /// `target op= value` (parsed so it can be rejected with a location).
    AugAssign {
        /// Assignment target expression.
        target: Expr,
        /// Operator token text, e.g. `+=`.
        op: String,
        /// Right-hand side expression.
        value: Expr,
    },
    /// A bare expression statement.
    Expr(Expr),
    /// `if`/`elif`/`else`. An `elif` chain nests as a single `If` inside
    /// `orelse`, mirroring the host language's own tree shape.
    If {
        /// Branch test expression.
        test: Expr,
        /// Statements executed when the test holds.
        body: Vec<Stmt>,
        /// `elif`/`else` continuation (possibly empty).
        orelse: Vec<Stmt>,
    },
    /// `try:` with one or more `except` handlers.
    Try {
        /// Guarded statements.
        body: Vec<Stmt>,
        /// Exception handlers in document order.
        handlers: Vec<ExceptHandler>,
    },
    /// `with ctx():` and its body.
    With {
        /// The context-manager expression.
        context: Expr,
        /// Body statements.
        body: Vec<Stmt>,
    },
    /// `raise` with an optional exception expression.
    Raise(Option<Expr>),
    /// `return` with an optional (ignored) value.
    Return(Option<Expr>),
    /// `pass`.
    Pass,
    /// `import a.b` or `from a.b import c` — recorded and otherwise ignored.
    Import {
        /// Dotted module path.
        module: String,
    },
}

/// One `except` clause of a `try` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Location of the `except` keyword.
    pub span: Span,
    /// Matched error names; empty for a bare `except:`.
    pub errors: Vec<String>,
    /// Handler body statements.
    pub body: Vec<Stmt>,
}

/// Verbatim task entry-method source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBody {
    /// The raw block text, exactly as written (indentation included).
    pub source: String,
    /// Location of the first token of the block.
    pub span: Span,
}

/// An expression together with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// Location of the first token of the expression.
    pub span: Span,
    /// The expression shape.
    pub kind: ExprKind,
}

/// Expression shapes accepted by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Bare identifier.
    Name(String),
    /// String literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// Boolean literal.
    Bool(bool),
    /// The `None` literal.
    None,
    /// `value[index]`.
    Subscript {
        /// Subscripted expression.
        value: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// `value.attr`.
    Attribute {
        /// Base expression.
        value: Box<Expr>,
        /// Attribute name.
        attr: String,
    },
    /// `func(args, kw=...)`.
    Call {
        /// Called expression.
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments in document order.
        kwargs: Vec<(String, Expr)>,
    },
    /// `{key: value, ...}`.
    Dict(Vec<(Expr, Expr)>),
    /// `[item, ...]`.
    List(Vec<Expr>),
    /// `(item, ...)`.
    Tuple(Vec<Expr>),
    /// `a and b` / `a or b`, with all operands collected.
    BoolOp {
        /// Which boolean operator joins the operands.
        op: BoolOp,
        /// Two or more operand expressions.
        values: Vec<Expr>,
    },
    /// `not operand`.
    Not(Box<Expr>),
    /// A single binary comparison.
    Compare {
        /// Left operand.
        left: Box<Expr>,
        /// Comparison operator.
        op: CmpOp,
        /// Right operand.
        right: Box<Expr>,
    },
}

impl Expr {
    /// Return the identifier when this expression is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Boolean connective of a [`ExprKind::BoolOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Comparison operators of a [`ExprKind::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// `is`
    Is,
    /// `is not`
    IsNot,
}
