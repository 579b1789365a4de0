//! Project assembly: classify module-level definitions and drive per-machine
//! translation.
//!
//! The assembler makes two passes over the module AST. The first registers
//! every `Task` subclass as a [`TaskDefinition`] and every function as a
//! state-machine candidate, then pre-scans function bodies for `map` and
//! `parallel` references so functions consumed as iterators or branches
//! never surface as top-level machines. The second pass compiles each
//! first-class function; nested references recurse through
//! [`Assembler::sub_machine`] with cycle detection. Per the error policy,
//! the first hard error abandons only the machine it occurred in.

use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

use crate::ast::{Expr, ExprKind, Module, Span, Stmt, StmtKind};
use crate::decorators::process_decorators;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::ir::{Project, StateMachine, SubMachine};
use crate::parser::parse_module;
use crate::tasks::{TaskDefinition, parse_task_class};
use crate::visitor::StatementVisitor;
use crate::{CompileError, Result};

/// Result of compiling one project source file.
#[derive(Debug)]
pub struct CompileOutput {
    /// The assembled project; partial when diagnostics contain errors.
    pub project: Project,
    /// Everything the translator had to say, in source order.
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile project source text into IR plus diagnostics.
///
/// No error escapes as `Err`: syntax problems and per-machine failures are
/// reported through the diagnostics stream and the project is returned as
/// far as it got.
pub fn compile_project(source: &str) -> CompileOutput {
    let mut diagnostics = Diagnostics::new();
    let module = match parse_module(source) {
        Ok(module) => module,
        Err(error) => {
            diagnostics.error(error);
            return CompileOutput {
                project: Project::default(),
                diagnostics: diagnostics.into_vec(),
            };
        }
    };
    let (project, diagnostics) = assemble(&module, diagnostics);
    CompileOutput {
        project,
        diagnostics: diagnostics.into_vec(),
    }
}

/// Role a function body is being compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// A first-class state machine.
    Machine,
    /// The iterator of a `map` state.
    MapIterator,
    /// One branch of a `parallel` state.
    ParallelBranch,
}

/// A registered state-machine function awaiting compilation.
#[derive(Debug, Clone, Copy)]
struct Function<'a> {
    decorators: &'a [Expr],
    body: &'a [Stmt],
    span: Span,
}

/// Shared state for one project translation run.
pub(crate) struct Assembler<'a> {
    tasks: std::collections::BTreeMap<String, TaskDefinition>,
    functions: IndexMap<String, Function<'a>>,
    consumed: HashSet<String>,
    building: Vec<String>,
    /// Diagnostics sink shared with the statement visitors.
    pub(crate) diagnostics: Diagnostics,
}

impl<'a> Assembler<'a> {
    /// Look up a task definition by class name.
    pub(crate) fn task_definition(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    /// True when a function with this name is defined at module scope.
    pub(crate) fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Compile the named function's body into an isolated sub-machine.
    pub(crate) fn sub_machine(&mut self, name: &str, role: Role, span: Span) -> Result<SubMachine> {
        let Some(function) = self.functions.get(name).copied() else {
            let what = match role {
                Role::MapIterator => "map iterator",
                Role::ParallelBranch => "parallel branch",
                Role::Machine => "state machine",
            };
            let available = self
                .functions
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CompileError::reference(
                span,
                format!(
                    "the {what} `{name}` is not a function defined at module scope. \
                     Available functions: {available}"
                ),
            ));
        };
        if self.building.iter().any(|frame| frame == name) {
            return Err(CompileError::shape(
                span,
                format!("`{name}` cannot be used as its own iterator or branch"),
            ));
        }
        self.building.push(name.to_string());
        debug!(machine = name, ?role, "compiling sub-machine");
        let result = StatementVisitor::new(self, role == Role::MapIterator).run(function.body);
        self.building.pop();
        result
    }
}

fn assemble(module: &Module, mut diagnostics: Diagnostics) -> (Project, Diagnostics) {
    let mut tasks = std::collections::BTreeMap::new();
    let mut functions: IndexMap<String, Function<'_>> = IndexMap::new();

    for stmt in &module.body {
        match &stmt.kind {
            StmtKind::ClassDef { name, bases, body } => {
                if !bases.iter().any(|base| base == "Task") {
                    diagnostics.error(CompileError::unsupported(
                        stmt.span,
                        "only classes that inherit from Task are supported",
                    ));
                    continue;
                }
                if tasks.contains_key(name.as_str()) {
                    diagnostics.error(CompileError::shape(
                        stmt.span,
                        format!("task class `{name}` is already defined"),
                    ));
                    continue;
                }
                match parse_task_class(name, body, stmt.span) {
                    Ok(definition) => {
                        tasks.insert(name.clone(), definition);
                    }
                    Err(error) => diagnostics.error(error),
                }
            }
            StmtKind::FunctionDef {
                name,
                decorators,
                body,
                ..
            } => {
                if functions.contains_key(name.as_str()) {
                    diagnostics.error(CompileError::shape(
                        stmt.span,
                        format!("state machine `{name}` is already defined"),
                    ));
                    continue;
                }
                functions.insert(
                    name.clone(),
                    Function {
                        decorators,
                        body,
                        span: stmt.span,
                    },
                );
            }
            StmtKind::Import { .. } => {}
            _ => diagnostics.error(CompileError::unsupported(
                stmt.span,
                "module-level statements must be class definitions, function definitions, \
                 or imports",
            )),
        }
    }

    // Functions referenced as iterators or branches are embedded where they
    // are used instead of becoming machines of their own. Self-references
    // are left alone so the cycle check can report them.
    let mut consumed = HashSet::new();
    for (name, function) in &functions {
        scan_consumed(name, function.body, &mut consumed);
    }

    let names: Vec<String> = functions.keys().cloned().collect();
    let mut assembler = Assembler {
        tasks,
        functions,
        consumed,
        building: Vec::new(),
        diagnostics,
    };

    let mut project = Project::default();
    for name in names {
        if assembler.consumed.contains(&name) {
            continue;
        }
        let function = assembler.functions[&name];
        let meta = match process_decorators(function.decorators) {
            Ok(meta) => meta,
            Err(error) => {
                assembler.diagnostics.error(error);
                continue;
            }
        };
        match assembler.sub_machine(&name, Role::Machine, function.span) {
            Ok(machine) => {
                project.state_machines.insert(
                    name.clone(),
                    StateMachine {
                        name: name.clone(),
                        machine,
                        schedule_expression: meta.schedule_expression,
                        subscriptions: meta.subscriptions,
                        exported: meta.exported,
                    },
                );
            }
            Err(error) => assembler.diagnostics.error(error),
        }
    }

    project.tasks = assembler.tasks;
    (project, assembler.diagnostics)
}

/// Collect names of functions used as map iterators or parallel branches.
fn scan_consumed(scope: &str, stmts: &[Stmt], consumed: &mut HashSet<String>) {
    fn scan_expr(scope: &str, expr: &Expr, consumed: &mut HashSet<String>) {
        if let ExprKind::Call { func, args, .. } = &expr.kind {
            match func.as_name() {
                Some("map") => {
                    if let Some(name) = args.get(1).and_then(Expr::as_name) {
                        if name != scope {
                            consumed.insert(name.to_string());
                        }
                    }
                }
                Some("parallel") => {
                    for arg in args {
                        if let Some(name) = arg.as_name() {
                            if name != scope {
                                consumed.insert(name.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { value, .. } => scan_expr(scope, value, consumed),
            StmtKind::Expr(expr) => scan_expr(scope, expr, consumed),
            StmtKind::If { body, orelse, .. } => {
                scan_consumed(scope, body, consumed);
                scan_consumed(scope, orelse, consumed);
            }
            StmtKind::Try { body, handlers } => {
                scan_consumed(scope, body, consumed);
                for handler in handlers {
                    scan_consumed(scope, &handler.body, consumed);
                }
            }
            StmtKind::With { body, .. } => scan_consumed(scope, body, consumed),
            _ => {}
        }
    }
}
