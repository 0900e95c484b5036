//! Compile diagnostics
//!
//! Errors and warnings accumulate in a buffer on the parser state. Errors
//! are capped; once the cap is hit the compilation aborts. Rendering goes
//! through codespan-reporting so messages carry source excerpts.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, termcolor::ColorChoice, termcolor::StandardStream};

/// Maximum number of errors before compilation aborts
pub const MAX_ERRORS: usize = 8;

/// A byte range in the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Create a span from byte offsets
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Join two spans into their covering range
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Self {
            start: r.start,
            end: r.end,
        }
    }
}

/// Severity of a buffered diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Compilation fails
    Error,
    /// Never fatal
    Warning,
}

/// One buffered diagnostic
#[derive(Debug, Clone)]
pub struct Diag {
    /// Error or warning
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Source range the message points at
    pub span: Span,
}

/// Diagnostic buffer shared by the whole pipeline
#[derive(Debug, Default)]
pub struct DiagBag {
    diags: Vec<Diag>,
    errors: usize,
}

impl DiagBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error; silently dropped past the cap
    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        if self.errors < MAX_ERRORS {
            self.errors += 1;
            self.diags.push(Diag {
                severity: Severity::Error,
                message: message.into(),
                span,
            });
        }
    }

    /// Record a warning
    pub fn warn(&mut self, span: Span, message: impl Into<String>) {
        self.diags.push(Diag {
            severity: Severity::Warning,
            message: message.into(),
            span,
        });
    }

    /// Number of buffered errors
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Whether any error was recorded
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Whether the error cap was reached and compilation must abort
    pub fn full(&self) -> bool {
        self.errors >= MAX_ERRORS
    }

    /// All buffered diagnostics in emission order
    pub fn iter(&self) -> impl Iterator<Item = &Diag> {
        self.diags.iter()
    }

    /// Render every diagnostic to stderr with source excerpts
    pub fn emit(&self, file_name: &str, source: &str) {
        let file = SimpleFile::new(file_name, source);
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        for diag in &self.diags {
            let rendered = match diag.severity {
                Severity::Error => Diagnostic::error(),
                Severity::Warning => Diagnostic::warning(),
            }
            .with_message(&diag.message)
            .with_labels(vec![Label::primary((), diag.span.start..diag.span.end)]);
            let _ = term::emit(&mut writer.lock(), &config, &file, &rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_cap() {
        let mut bag = DiagBag::new();
        for i in 0..20 {
            bag.error(Span::new(i, i + 1), format!("error {i}"));
        }
        assert_eq!(bag.error_count(), MAX_ERRORS);
        assert!(bag.full());
    }

    #[test]
    fn test_warnings_never_cap() {
        let mut bag = DiagBag::new();
        for i in 0..20 {
            bag.warn(Span::new(i, i + 1), "unused");
        }
        assert!(!bag.has_errors());
        assert!(!bag.full());
        assert_eq!(bag.iter().count(), 20);
    }

    #[test]
    fn test_span_join() {
        let a = Span::new(4, 8);
        let b = Span::new(10, 12);
        assert_eq!(a.to(b), Span::new(4, 12));
    }
}
