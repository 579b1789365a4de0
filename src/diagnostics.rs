use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CompileError;
use crate::ast::Span;

/// Classification of a diagnostic, mirroring the translator's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A statement or expression shape the DSL does not support.
    SyntaxUnsupported,
    /// A task class, iterator function, or branch function that is not
    /// defined at module scope.
    Reference,
    /// An invalid or out-of-range task attribute or call option.
    Attribute,
    /// Two states in the same sub-machine share a key.
    KeyCollision,
    /// Structural misuse of an otherwise supported construct.
    Shape,
    /// An unknown or malformed state-machine decorator.
    Decorator,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticKind::SyntaxUnsupported => "unsupported syntax",
            DiagnosticKind::Reference => "unresolved reference",
            DiagnosticKind::Attribute => "invalid attribute",
            DiagnosticKind::KeyCollision => "key collision",
            DiagnosticKind::Shape => "malformed construct",
            DiagnosticKind::Decorator => "invalid decorator",
        };
        f.write_str(label)
    }
}

/// Whether a diagnostic aborted translation of its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Translation continued; the output reflects a documented fallback.
    Warning,
    /// Translation of the affected state machine was abandoned.
    Error,
}

/// A single message in the translator's side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Diagnostic classification.
    pub kind: DiagnosticKind,
    /// Whether this stopped translation of the machine.
    pub severity: Severity,
    /// Source location the message refers to.
    pub span: Span,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.span, self.message)
    }
}

impl From<CompileError> for Diagnostic {
    fn from(error: CompileError) -> Self {
        Diagnostic {
            kind: error.kind(),
            severity: Severity::Error,
            span: error.span(),
            message: error.message().to_string(),
        }
    }
}

/// Ordered sink of diagnostics collected over one translation run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Record a hard error.
    pub fn error(&mut self, error: CompileError) {
        self.items.push(error.into());
    }

    /// Record a warning at the given location.
    pub fn warn(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.items.push(Diagnostic {
            kind,
            severity: Severity::Warning,
            span,
            message: message.into(),
        });
    }

    /// True if any collected diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.items
            .iter()
            .any(|item| item.severity == Severity::Error)
    }

    /// Number of collected diagnostics.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the collected diagnostics in order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Consume the sink, yielding the diagnostics in order.
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
