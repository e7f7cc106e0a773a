//! Error taxonomy and diagnostic reporting.
//!
//! Five error kinds, none of them exceptions: `LexError` and
//! `ParseError` and `SemanticError` are collected into a caller-provided
//! `Reporter` so a single compile attempt can surface as many issues as
//! possible; `InternalError` aborts the job immediately, since it
//! signals a broken compiler invariant rather than bad user input;
//! `ResourceError` is retried once (buffer doubled) before surfacing.
//!
//! None of these derive from `thiserror` — the rest of this codebase
//! hand-writes its `Display` impls, and we follow suit.

use std::fmt;

/// Byte offset into the original source string. Kept as a bare `usize`
/// rather than a `(line, col)` pair so that resolving line/column stays
/// a cheap, on-demand scan over the source rather than a per-token cost
/// paid during lexing.
pub type Position = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnterminatedString,
    UnterminatedSymbol,
    MalformedNumber,
    /// The `....` case: four or more dots in a row is not any valid
    /// token.
    InvalidDotRun,
    InvalidChar,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LexErrorKind::UnterminatedString => "unterminated string literal",
            LexErrorKind::UnterminatedSymbol => "unterminated symbol literal",
            LexErrorKind::MalformedNumber => "malformed numeric literal",
            LexErrorKind::InvalidDotRun => "invalid run of dots",
            LexErrorKind::InvalidChar => "invalid character",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub position: Position,
    pub kind: LexErrorKind,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind, self.position)
    }
}

impl std::error::Error for LexError {}

/// What the parser wanted to see next, for `ParseError::expected`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    Token(&'static str),
    OneOf(&'static [&'static str]),
    Description(String),
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Token(t) => write!(f, "'{t}'"),
            Expected::OneOf(ts) => write!(f, "one of {ts:?}"),
            Expected::Description(d) => f.write_str(d),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub token_index: usize,
    pub expected: Expected,
    pub found: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at token {}: expected {}, found {}",
            self.token_index, self.expected, self.found
        )
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticErrorKind {
    UndefinedName(String),
    TypeMismatch { context: String },
    Redefinition(String),
    InvalidAssignTarget,
}

impl fmt::Display for SemanticErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticErrorKind::UndefinedName(name) => write!(f, "undefined name '{name}'"),
            SemanticErrorKind::TypeMismatch { context } => {
                write!(f, "type mismatch in {context}")
            }
            SemanticErrorKind::Redefinition(name) => {
                write!(f, "'{name}' is already defined in this scope")
            }
            SemanticErrorKind::InvalidAssignTarget => {
                write!(f, "invalid assignment target")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticError {
    pub position: Position,
    pub kind: SemanticErrorKind,
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind, self.position)
    }
}

impl std::error::Error for SemanticError {}

/// A broken compiler invariant: phi input count mismatch, serialized
/// block range overflow, and similar programming faults. These are
/// never shown to the end user under normal operation; they abort the
/// job immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalError {
    pub message: String,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> InternalError {
        InternalError {
            message: message.into(),
        }
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal compiler error: {}", self.message)
    }
}

impl std::error::Error for InternalError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceErrorKind {
    JitBufferExhausted,
    OutOfMemory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceError {
    pub kind: ResourceErrorKind,
    pub message: String,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ResourceError {}

/// One error, in the shape a user or tool sees it: kind-tagged, with a
/// line/column resolved from a byte position and the original source.
/// `Serialize` backs `hadronc --json`, the machine-readable diagnostic
/// format an editor/IDE integration would consume instead of parsing
/// the human-readable `Display` text.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub kind: DiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Lex,
    Parse,
    Semantic,
}

impl Diagnostic {
    pub fn from_lex(source: &str, err: &LexError) -> Diagnostic {
        let (line, column) = line_col(source, err.position);
        Diagnostic {
            line,
            column,
            kind: DiagnosticKind::Lex,
            message: err.to_string(),
        }
    }

    pub fn from_parse(source: &str, position: Position, err: &ParseError) -> Diagnostic {
        let (line, column) = line_col(source, position);
        Diagnostic {
            line,
            column,
            kind: DiagnosticKind::Parse,
            message: err.to_string(),
        }
    }

    pub fn from_semantic(source: &str, err: &SemanticError) -> Diagnostic {
        let (line, column) = line_col(source, err.position);
        Diagnostic {
            line,
            column,
            kind: DiagnosticKind::Semantic,
            message: err.kind.to_string(),
        }
    }
}

/// Computes 1-indexed line and column for a byte offset into `source`.
/// Deliberately a linear scan done once per diagnostic rather than a
/// precomputed line-start table: diagnostics are rare relative to
/// tokens, so this keeps the lexer itself allocation-free.
fn line_col(source: &str, position: Position) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= position {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// The caller-provided collaborator that collects diagnostics across a
/// whole compile attempt. A stage may report any number of diagnostics
/// but halts at the end of the failing stage once any have been
/// recorded.
pub trait Reporter {
    fn report(&mut self, diagnostic: Diagnostic);
    fn has_errors(&self) -> bool;
}

/// Default `Reporter` implementation: collects diagnostics into a `Vec`
/// in the order they were reported.
#[derive(Debug, Default)]
pub struct VecReporter {
    pub diagnostics: Vec<Diagnostic>,
}

impl Reporter for VecReporter {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_handles_first_line() {
        assert_eq!(line_col("abc", 1), (1, 2));
    }

    #[test]
    fn line_col_handles_newlines() {
        let src = "abc\ndef\nghi";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 4), (2, 1));
        assert_eq!(line_col(src, 9), (3, 2));
    }

    #[test]
    fn vec_reporter_collects_multiple_diagnostics() {
        let mut reporter = VecReporter::default();
        assert!(!reporter.has_errors());
        reporter.report(Diagnostic {
            line: 1,
            column: 1,
            kind: DiagnosticKind::Lex,
            message: "oops".into(),
        });
        reporter.report(Diagnostic {
            line: 2,
            column: 3,
            kind: DiagnosticKind::Parse,
            message: "oops again".into(),
        });
        assert!(reporter.has_errors());
        assert_eq!(reporter.diagnostics.len(), 2);
    }
}
