//! Non-fatal diagnostics collected while compiling and rendering a report.
//!
//! Every warning is also emitted through `tracing` so that hosts with a
//! subscriber see it in their logs; the collected list is rendered next to
//! the report output.

use std::cell::RefCell;
use std::fmt;

use serde::Serialize;

/// Category of a non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A parameter value failed its character-class policy.
    ValidationRejected,
    /// A parameter name is not part of the schema.
    UnsupportedParameter,
    /// A match expression, format name or similar was not understood.
    GrammarUnrecognized,
}

/// A single recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Accumulates diagnostics for one report request.
///
/// Uses interior mutability so read-only paths (formatting, value lookup)
/// can still record warnings.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: RefCell<Vec<Diagnostic>>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and log it at warn level.
    pub fn warn(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(kind, message));
    }

    /// Record an already-built diagnostic.
    pub fn push(&self, diagnostic: Diagnostic) {
        tracing::warn!(kind = ?diagnostic.kind, "{}", diagnostic.message);
        self.entries.borrow_mut().push(diagnostic);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Snapshot of the recorded diagnostics, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Diagnostic> {
        self.entries.borrow().clone()
    }

    /// Whether any diagnostic of the given kind has been recorded.
    #[must_use]
    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.entries.borrow().iter().any(|d| d.kind == kind)
    }
}
