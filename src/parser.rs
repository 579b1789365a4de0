//! Recursive-descent parser for the workflow DSL's host syntax.
//!
//! The parser accepts exactly the statement and expression shapes the
//! translator consumes: definitions, decorators, assignments, calls,
//! control flow, error handling, and literals. Task
//! entry methods (`async def run`) are deliberately *not* parsed — their
//! block is captured verbatim as a source slice for downstream packaging.

use crate::ast::{
    BoolOp, CmpOp, ExceptHandler, Expr, ExprKind, Module, Span, Stmt, StmtKind, TaskBody,
};
use crate::lexer::{Tok, Token, tokenize};
use crate::{CompileError, Result};

/// Parse project source text into a [`Module`].
pub fn parse_module(source: &str) -> Result<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        src: source,
        tokens,
        index: 0,
    };
    parser.module()
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    index: usize,
}

impl<'a> Parser<'a> {
    fn module(&mut self) -> Result<Module> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            let Some(token) = self.peek() else { break };
            match &token.tok {
                Tok::At => {
                    let decorators = self.decorator_list()?;
                    if !self.at_name("def") {
                        return Err(self.unsupported("decorators can only precede `def`"));
                    }
                    body.push(self.function_def(decorators)?);
                }
                Tok::Name(name) => match name.as_str() {
                    "class" => body.push(self.class_def()?),
                    "def" => body.push(self.function_def(Vec::new())?),
                    "import" | "from" => body.push(self.import()?),
                    _ => {
                        return Err(self.unsupported(
                            "module-level statements must be class definitions, function \
                             definitions, or imports",
                        ));
                    }
                },
                _ => {
                    return Err(self.unsupported(
                        "module-level statements must be class definitions, function \
                         definitions, or imports",
                    ));
                }
            }
        }
        Ok(Module { body })
    }

    fn decorator_list(&mut self) -> Result<Vec<Expr>> {
        let mut decorators = Vec::new();
        while self.eat(&Tok::At) {
            decorators.push(self.expr()?);
            self.expect_newline("decorator")?;
            self.skip_newlines();
        }
        Ok(decorators)
    }

    fn class_def(&mut self) -> Result<Stmt> {
        let span = self.span();
        self.eat_keyword("class")?;
        let name = self.name("class name")?;
        let mut bases = Vec::new();
        if self.eat(&Tok::LParen) {
            while !self.eat(&Tok::RParen) {
                bases.push(self.name("base class name")?);
                if !self.eat(&Tok::Comma) {
                    self.expect(&Tok::RParen, "`)` after base classes")?;
                    break;
                }
            }
        }
        let body = self.block()?;
        Ok(Stmt {
            span,
            kind: StmtKind::ClassDef { name, bases, body },
        })
    }

    fn function_def(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let span = self.span();
        self.eat_keyword("def")?;
        let name = self.name("function name")?;
        let params = self.parameter_list()?;
        let body = self.block()?;
        Ok(Stmt {
            span,
            kind: StmtKind::FunctionDef {
                name,
                params,
                decorators,
                body,
            },
        })
    }

    /// `async def name(...):` with a verbatim body capture.
    fn async_function_def(&mut self) -> Result<Stmt> {
        let span = self.span();
        self.eat_keyword("async")?;
        self.eat_keyword("def")?;
        let name = self.name("method name")?;
        let params = self.parameter_list()?;
        self.expect(&Tok::Colon, "`:` after method signature")?;
        let body = self.capture_block()?;
        Ok(Stmt {
            span,
            kind: StmtKind::AsyncFunctionDef { name, params, body },
        })
    }

    fn parameter_list(&mut self) -> Result<Vec<String>> {
        self.expect(&Tok::LParen, "`(` after name")?;
        let mut params = Vec::new();
        while !self.eat(&Tok::RParen) {
            params.push(self.name("parameter name")?);
            if !self.eat(&Tok::Comma) {
                self.expect(&Tok::RParen, "`)` after parameters")?;
                break;
            }
        }
        Ok(params)
    }

    /// Consume a block without parsing it, returning the raw source slice.
    fn capture_block(&mut self) -> Result<TaskBody> {
        if self.eat(&Tok::Newline) {
            self.expect(&Tok::Indent, "an indented block")?;
            let Some(first) = self.peek() else {
                return Err(self.unsupported("unexpected end of input in method body"));
            };
            let span = first.span;
            let start = first.start;
            let mut end = first.end;
            let mut depth = 1usize;
            loop {
                let Some(token) = self.peek() else {
                    return Err(self.unsupported("unexpected end of input in method body"));
                };
                match token.tok {
                    Tok::Indent => depth += 1,
                    Tok::Dedent => {
                        depth -= 1;
                        if depth == 0 {
                            self.advance();
                            break;
                        }
                    }
                    _ => end = token.end,
                }
                self.advance();
            }
            Ok(TaskBody {
                source: self.src[start..end].to_string(),
                span,
            })
        } else {
            // Inline body on the signature line.
            let Some(first) = self.peek() else {
                return Err(self.unsupported("expected a method body"));
            };
            let span = first.span;
            let start = first.start;
            let mut end = first.end;
            while let Some(token) = self.peek() {
                if token.tok == Tok::Newline {
                    break;
                }
                end = token.end;
                self.advance();
            }
            self.expect_newline("method body")?;
            Ok(TaskBody {
                source: self.src[start..end].to_string(),
                span,
            })
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Tok::Colon, "`:` to open a block")?;
        if self.eat(&Tok::Newline) {
            self.expect(&Tok::Indent, "an indented block")?;
            let mut body = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat(&Tok::Dedent) {
                    break;
                }
                if self.peek().is_none() {
                    break;
                }
                body.push(self.statement()?);
            }
            Ok(body)
        } else {
            // Single simple statement on the same line.
            Ok(vec![self.simple_statement()?])
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        match self.peek_name() {
            Some("if") => self.if_chain("if"),
            Some("try") => self.try_statement(),
            Some("with") => self.with_statement(),
            Some("async") => self.async_function_def(),
            Some("def") | Some("class") => {
                Err(self.unsupported("nested definitions are not supported"))
            }
            _ => self.simple_statement(),
        }
    }

    fn if_chain(&mut self, keyword: &str) -> Result<Stmt> {
        let span = self.span();
        self.eat_keyword(keyword)?;
        let test = self.expr()?;
        let body = self.block()?;
        let orelse = if self.at_name("elif") {
            vec![self.if_chain("elif")?]
        } else if self.at_name("else") {
            self.advance();
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            span,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    fn try_statement(&mut self) -> Result<Stmt> {
        let span = self.span();
        self.eat_keyword("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.at_name("except") {
            let handler_span = self.span();
            self.advance();
            let errors = if self.at(&Tok::Colon) {
                Vec::new()
            } else {
                let expr = self.expr()?;
                if self.at_name("as") {
                    return Err(self.unsupported("binding the caught exception is not supported"));
                }
                error_names(&expr)?
            };
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                span: handler_span,
                errors,
                body: handler_body,
            });
        }
        if handlers.is_empty() {
            return Err(self.unsupported("`try` requires at least one `except` clause"));
        }
        if self.at_name("else") || self.at_name("finally") {
            return Err(self.unsupported(
                "`else` and `finally` clauses on `try` are not supported",
            ));
        }
        Ok(Stmt {
            span,
            kind: StmtKind::Try { body, handlers },
        })
    }

    fn with_statement(&mut self) -> Result<Stmt> {
        let span = self.span();
        self.eat_keyword("with")?;
        let context = self.expr()?;
        if self.at_name("as") {
            return Err(self.unsupported("binding the context manager is not supported"));
        }
        let body = self.block()?;
        Ok(Stmt {
            span,
            kind: StmtKind::With { context, body },
        })
    }

    fn import(&mut self) -> Result<Stmt> {
        let span = self.span();
        if self.eat_name("from") {
            let module = self.dotted_name()?;
            self.eat_keyword("import")?;
            loop {
                self.name("imported name")?;
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect_newline("import")?;
            Ok(Stmt {
                span,
                kind: StmtKind::Import { module },
            })
        } else {
            self.eat_keyword("import")?;
            let module = self.dotted_name()?;
            self.expect_newline("import")?;
            Ok(Stmt {
                span,
                kind: StmtKind::Import { module },
            })
        }
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut path = self.name("module name")?;
        while self.eat(&Tok::Dot) {
            path.push('.');
            path.push_str(&self.name("module name")?);
        }
        Ok(path)
    }

    fn simple_statement(&mut self) -> Result<Stmt> {
        let span = self.span();
        let kind = match self.peek_name() {
            Some("raise") => {
                self.advance();
                let exc = if self.at(&Tok::Newline) {
                    None
                } else {
                    Some(self.expr()?)
                };
                StmtKind::Raise(exc)
            }
            Some("return") => {
                self.advance();
                let value = if self.at(&Tok::Newline) {
                    None
                } else {
                    Some(self.expr()?)
                };
                StmtKind::Return(value)
            }
            Some("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Some("import") | Some("from") => return self.import(),
            _ => {
                let target = self.expr()?;
                if self.eat(&Tok::Assign) {
                    let value = self.expr()?;
                    StmtKind::Assign { target, value }
                } else if let Some(op) = self.peek_aug_op() {
                    self.advance();
                    let value = self.expr()?;
                    StmtKind::AugAssign { target, op, value }
                } else {
                    StmtKind::Expr(target)
                }
            }
        };
        self.expect_newline("statement")?;
        Ok(Stmt { span, kind })
    }

    fn peek_aug_op(&self) -> Option<String> {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Op(op)) if op.ends_with('=') && op.len() > 1 => Some(op.clone()),
            _ => None,
        }
    }

    // Expressions, in precedence order: or < and < not < comparison < postfix.

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let first = self.and_expr()?;
        if !self.at_name("or") {
            return Ok(first);
        }
        let span = first.span;
        let mut values = vec![first];
        while self.eat_name("or") {
            values.push(self.and_expr()?);
        }
        Ok(Expr {
            span,
            kind: ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
        })
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let first = self.not_expr()?;
        if !self.at_name("and") {
            return Ok(first);
        }
        let span = first.span;
        let mut values = vec![first];
        while self.eat_name("and") {
            values.push(self.not_expr()?);
        }
        Ok(Expr {
            span,
            kind: ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
        })
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.at_name("not") {
            let span = self.span();
            self.advance();
            let operand = self.not_expr()?;
            return Ok(Expr {
                span,
                kind: ExprKind::Not(Box::new(operand)),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.postfix()?;
        let Some(op) = self.comparison_op()? else {
            return Ok(left);
        };
        let right = self.postfix()?;
        if self.comparison_op()?.is_some() {
            return Err(self.unsupported("chained comparisons are not supported"));
        }
        let span = left.span;
        Ok(Expr {
            span,
            kind: ExprKind::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
        })
    }

    fn comparison_op(&mut self) -> Result<Option<CmpOp>> {
        let op = match self.peek().map(|t| &t.tok) {
            Some(Tok::Eq) => CmpOp::Eq,
            Some(Tok::NotEq) => CmpOp::NotEq,
            Some(Tok::Lt) => CmpOp::Lt,
            Some(Tok::LtE) => CmpOp::LtE,
            Some(Tok::Gt) => CmpOp::Gt,
            Some(Tok::GtE) => CmpOp::GtE,
            Some(Tok::Name(name)) if name == "is" => {
                self.advance();
                if self.eat_name("not") {
                    return Ok(Some(CmpOp::IsNot));
                }
                return Ok(Some(CmpOp::Is));
            }
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(op))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&Tok::Dot) {
                let attr = self.name("attribute name")?;
                expr = Expr {
                    span: expr.span,
                    kind: ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                };
            } else if self.at(&Tok::LParen) {
                let (args, kwargs) = self.call_arguments()?;
                expr = Expr {
                    span: expr.span,
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    },
                };
            } else if self.eat(&Tok::LBracket) {
                let index = self.expr()?;
                self.expect(&Tok::RBracket, "`]` after subscript")?;
                expr = Expr {
                    span: expr.span,
                    kind: ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        self.expect(&Tok::LParen, "`(`")?;
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        loop {
            if self.eat(&Tok::RParen) {
                break;
            }
            if let (Some(Tok::Name(name)), Some(Tok::Assign)) = (
                self.peek().map(|t| &t.tok),
                self.peek_at(1).map(|t| &t.tok),
            ) {
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.expr()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.unsupported("positional argument follows keyword argument"));
                }
                args.push(self.expr()?);
            }
            if !self.eat(&Tok::Comma) {
                self.expect(&Tok::RParen, "`)` after arguments")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr> {
        let span = self.span();
        let Some(token) = self.peek() else {
            return Err(self.unsupported("expected an expression"));
        };
        let kind = match &token.tok {
            Tok::Name(name) => {
                let kind = match name.as_str() {
                    "True" => ExprKind::Bool(true),
                    "False" => ExprKind::Bool(false),
                    "None" => ExprKind::None,
                    _ => ExprKind::Name(name.clone()),
                };
                self.advance();
                kind
            }
            Tok::Int(value) => {
                let value = *value;
                self.advance();
                ExprKind::Int(value)
            }
            Tok::Float(value) => {
                let value = *value;
                self.advance();
                ExprKind::Float(value)
            }
            Tok::Str(value) => {
                let value = value.clone();
                self.advance();
                ExprKind::Str(value)
            }
            Tok::Op(op) if op == "-" => {
                self.advance();
                match self.peek().map(|t| t.tok.clone()) {
                    Some(Tok::Int(value)) => {
                        self.advance();
                        ExprKind::Int(-value)
                    }
                    Some(Tok::Float(value)) => {
                        self.advance();
                        ExprKind::Float(-value)
                    }
                    _ => return Err(self.unsupported("`-` is only allowed on number literals")),
                }
            }
            Tok::LParen => {
                self.advance();
                let mut items = vec![self.expr()?];
                let mut is_tuple = false;
                while self.eat(&Tok::Comma) {
                    is_tuple = true;
                    if self.at(&Tok::RParen) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect(&Tok::RParen, "`)`")?;
                if is_tuple {
                    ExprKind::Tuple(items)
                } else {
                    return Ok(items.pop().expect("one parenthesized expression"));
                }
            }
            Tok::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat(&Tok::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&Tok::Comma) {
                        self.expect(&Tok::RBracket, "`]` after list items")?;
                        break;
                    }
                }
                ExprKind::List(items)
            }
            Tok::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.eat(&Tok::RBrace) {
                    let key = self.expr()?;
                    self.expect(&Tok::Colon, "`:` after dict key")?;
                    let value = self.expr()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        self.expect(&Tok::RBrace, "`}` after dict entries")?;
                        break;
                    }
                }
                ExprKind::Dict(entries)
            }
            other => {
                return Err(self.unsupported(&format!("unexpected token {other:?} in expression")));
            }
        };
        Ok(Expr { span, kind })
    }

    // Token-cursor plumbing.

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.index + offset)
    }

    fn peek_name(&self) -> Option<&str> {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Name(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    fn span(&self) -> Span {
        self.peek()
            .map(|t| t.span)
            .or_else(|| self.tokens.last().map(|t| t.span))
            .unwrap_or_default()
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() {
            self.index += 1;
        }
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek().map(|t| &t.tok) == Some(tok)
    }

    fn at_name(&self, name: &str) -> bool {
        self.peek_name() == Some(name)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.at_name(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, name: &str) -> Result<()> {
        if self.eat_name(name) {
            Ok(())
        } else {
            Err(self.unsupported(&format!("expected `{name}`")))
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unsupported(&format!("expected {what}")))
        }
    }

    fn expect_newline(&mut self, after: &str) -> Result<()> {
        if self.eat(&Tok::Newline) || self.peek().is_none() || self.at(&Tok::Dedent) {
            Ok(())
        } else {
            Err(self.unsupported(&format!("expected end of line after {after}")))
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Tok::Newline) {}
    }

    fn name(&mut self, what: &str) -> Result<String> {
        match self.peek().map(|t| t.tok.clone()) {
            Some(Tok::Name(name)) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unsupported(&format!("expected {what}"))),
        }
    }

    fn unsupported(&self, message: &str) -> CompileError {
        CompileError::unsupported(self.span(), message)
    }
}

/// Extract exception names from an `except` clause type expression.
fn error_names(expr: &Expr) -> Result<Vec<String>> {
    fn single(expr: &Expr) -> Result<String> {
        match &expr.kind {
            ExprKind::Name(name) => Ok(name.clone()),
            ExprKind::Attribute { value, attr } if value.as_name() == Some("States") => {
                Ok(format!("States.{attr}"))
            }
            _ => Err(CompileError::unsupported(
                expr.span,
                "exception handlers must name an exception class or a tuple of classes",
            )),
        }
    }
    match &expr.kind {
        ExprKind::Tuple(items) => items.iter().map(single).collect(),
        _ => Ok(vec![single(expr)?]),
    }
}
