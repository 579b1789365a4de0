//! stepc – a front-end compiler from a workflow DSL to a state-machine IR
//!
//! Project files describe workflows in a scripting-language syntax: task
//! classes declare units of work, and module-level functions wire them into
//! control flow. This crate parses that source, validates the DSL subset,
//! and builds an in-memory graph of Amazon States Language states:
//! - Statements lower to Task, Pass, Choice, Map, Parallel, Wait, Succeed,
//!   and Fail states with unique keys and linked `Next`/`End` edges
//! - Boolean tests compile into typed ASL choice operators
//! - `try`/`except` and `with retry(...)` attach catchers and retriers
//! - Function decorators carry schedule, subscription, and export metadata
//!
//! Downstream tools render the IR to ASL JSON and packaging artifacts; this
//! crate's only side channel is its diagnostics stream.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Abstract syntax tree for the DSL's host syntax.
pub mod ast;
/// Diagnostic kinds, severities, and the collection sink.
pub mod diagnostics;
/// Typed intermediate representation of compiled state machines.
pub mod ir;
/// Indentation-aware tokenizer.
pub mod lexer;
/// Recursive-descent parser producing the AST.
pub mod parser;
/// Project assembly and the top-level compile entry point.
pub mod project;
/// Task definitions and the service task family.
pub mod tasks;

mod choice;
mod decorators;
mod linker;
mod visitor;

pub use ast::{Module, Span};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use ir::{
    Catch, ChoiceBranch, ChoiceRule, ChoiceState, CompareOp, CompareValue, FailState, MapState,
    ParallelState, PassState, Project, Retry, State, StateKind, StateMachine, SubMachine,
    Subscription, SubscriptionStatus, TaskState, Transition, WaitState,
};
pub use parser::parse_module;
pub use project::{CompileOutput, compile_project};
pub use tasks::{Service, TaskDefinition};

use thiserror::Error;

/// Convenience result alias for translator passes.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors raised while translating a project file.
///
/// Every variant carries the source location it refers to; the project
/// assembler converts them into [`Diagnostic`]s at the per-machine boundary,
/// so no error escapes [`compile_project`].
#[derive(Debug, Error)]
pub enum CompileError {
    /// A statement or expression shape the DSL does not support.
    #[error("unsupported syntax at {span}: {message}")]
    Unsupported {
        /// Source location of the offending construct.
        span: Span,
        /// What was expected instead.
        message: String,
    },

    /// A task class, iterator, or branch referenced but not defined.
    #[error("unresolved reference at {span}: {message}")]
    Reference {
        /// Source location of the reference.
        span: Span,
        /// What failed to resolve.
        message: String,
    },

    /// An invalid or out-of-range task attribute or call option.
    #[error("invalid attribute at {span}: {message}")]
    Attribute {
        /// Source location of the attribute.
        span: Span,
        /// Which constraint was violated.
        message: String,
    },

    /// Two states in one sub-machine share a key.
    #[error("key collision at {span}: {message}")]
    KeyCollision {
        /// Source location of the later state.
        span: Span,
        /// The colliding key.
        message: String,
    },

    /// Structural misuse of an otherwise supported construct.
    #[error("malformed construct at {span}: {message}")]
    Shape {
        /// Source location of the construct.
        span: Span,
        /// What is structurally wrong.
        message: String,
    },

    /// An unknown or malformed state-machine decorator.
    #[error("invalid decorator at {span}: {message}")]
    Decorator {
        /// Source location of the decorator.
        span: Span,
        /// Which rule the decorator broke.
        message: String,
    },
}

impl CompileError {
    pub(crate) fn unsupported(span: Span, message: impl Into<String>) -> Self {
        CompileError::Unsupported {
            span,
            message: message.into(),
        }
    }

    pub(crate) fn reference(span: Span, message: impl Into<String>) -> Self {
        CompileError::Reference {
            span,
            message: message.into(),
        }
    }

    pub(crate) fn attribute(span: Span, message: impl Into<String>) -> Self {
        CompileError::Attribute {
            span,
            message: message.into(),
        }
    }

    pub(crate) fn key_collision(span: Span, message: impl Into<String>) -> Self {
        CompileError::KeyCollision {
            span,
            message: message.into(),
        }
    }

    pub(crate) fn shape(span: Span, message: impl Into<String>) -> Self {
        CompileError::Shape {
            span,
            message: message.into(),
        }
    }

    pub(crate) fn decorator(span: Span, message: impl Into<String>) -> Self {
        CompileError::Decorator {
            span,
            message: message.into(),
        }
    }

    /// The diagnostic classification of this error.
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            CompileError::Unsupported { .. } => DiagnosticKind::SyntaxUnsupported,
            CompileError::Reference { .. } => DiagnosticKind::Reference,
            CompileError::Attribute { .. } => DiagnosticKind::Attribute,
            CompileError::KeyCollision { .. } => DiagnosticKind::KeyCollision,
            CompileError::Shape { .. } => DiagnosticKind::Shape,
            CompileError::Decorator { .. } => DiagnosticKind::Decorator,
        }
    }

    /// The source location the error refers to.
    pub fn span(&self) -> Span {
        match self {
            CompileError::Unsupported { span, .. }
            | CompileError::Reference { span, .. }
            | CompileError::Attribute { span, .. }
            | CompileError::KeyCollision { span, .. }
            | CompileError::Shape { span, .. }
            | CompileError::Decorator { span, .. } => *span,
        }
    }

    /// The human-readable message, without the location prefix.
    pub fn message(&self) -> &str {
        match self {
            CompileError::Unsupported { message, .. }
            | CompileError::Reference { message, .. }
            | CompileError::Attribute { message, .. }
            | CompileError::KeyCollision { message, .. }
            | CompileError::Shape { message, .. }
            | CompileError::Decorator { message, .. } => message,
        }
    }
}
