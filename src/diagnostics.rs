//! Source positions and compile-time diagnostics.
//!
//! `CompileError` follows the reference lineage's hand-rolled error shape:
//! a struct carrying a position and a `Cow<'static, str>` message, built
//! through per-trigger constructor helpers, with no `thiserror`/`anyhow`
//! anywhere in the mix.

use std::borrow::Cow;
use std::fmt;

use ruff_text_size::{TextRange, TextSize};

use crate::intern::StringId;

/// A line/column pair, 1-indexed to match editor and traceback conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

/// A source span plus the file it belongs to.
///
/// Every AST node the compiler visits carries one of these; every diagnostic
/// and every `LocationEntry` in a finished [`crate::bytecode::Code`] points
/// back to one.
#[derive(Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    pub filename: StringId,
    pub start: CodeLoc,
    pub end: CodeLoc,
}

impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.filename.index(),
            self.start.line,
            self.start.column,
            self.end.line,
            self.end.column
        )
    }
}

impl CodeRange {
    #[must_use]
    pub fn new(filename: StringId, start: CodeLoc, end: CodeLoc) -> Self {
        Self { filename, start, end }
    }

    /// A zero-width placeholder range for synthesized nodes (e.g. the
    /// implicit `return None` appended to every function body).
    #[must_use]
    pub fn synthetic(filename: StringId) -> Self {
        let loc = CodeLoc { line: 0, column: 0 };
        Self::new(filename, loc, loc)
    }
}

/// Precomputed newline offsets for converting [`TextRange`] byte offsets
/// into line/column pairs without rescanning the source on every node.
pub struct LineIndex {
    line_starts: Vec<TextSize>,
}

impl LineIndex {
    #[must_use]
    pub fn from_source(source: &str) -> Self {
        let mut line_starts = vec![TextSize::from(0)];
        for (idx, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(TextSize::try_from(idx + 1).expect("source longer than u32::MAX"));
            }
        }
        Self { line_starts }
    }

    #[must_use]
    pub fn loc(&self, offset: TextSize) -> CodeLoc {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insertion) => insertion - 1,
        };
        let column = offset - self.line_starts[line];
        CodeLoc {
            line: u32::try_from(line + 1).expect("line number overflow"),
            column: u32::from(column) + 1,
        }
    }

    #[must_use]
    pub fn code_range(&self, filename: StringId, range: TextRange) -> CodeRange {
        CodeRange::new(filename, self.loc(range.start()), self.loc(range.end()))
    }
}

/// The category of a [`CompileError`], per the trigger list in the
/// error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    BreakOutsideLoop,
    ContinueOutsideLoop,
    ReturnOutsideFunction,
    MixedExceptStar,
    BareExceptStar,
    Unsupported,
    JumpOutOfRange,
    ArgumentOutOfRange,
    MultiTargetDelUnsupported,
}

/// A single compile-time diagnostic.
///
/// Compilation never aborts on one of these: every pass collects as many as
/// it can into a `Vec<CompileError>` and keeps going, per the "report
/// multiple errors in one pass" requirement. A non-empty list means the
/// accompanying code object must not be executed.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub position: CodeRange,
    pub message: Cow<'static, str>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.position, self.message)
    }
}

impl CompileError {
    fn new(kind: CompileErrorKind, position: CodeRange, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            position,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn break_outside_loop(position: CodeRange) -> Self {
        Self::new(CompileErrorKind::BreakOutsideLoop, position, "'break' outside loop")
    }

    #[must_use]
    pub fn continue_outside_loop(position: CodeRange) -> Self {
        Self::new(CompileErrorKind::ContinueOutsideLoop, position, "'continue' not properly in loop")
    }

    #[must_use]
    pub fn return_outside_function(position: CodeRange) -> Self {
        Self::new(CompileErrorKind::ReturnOutsideFunction, position, "'return' outside function")
    }

    #[must_use]
    pub fn mixed_except_star(position: CodeRange) -> Self {
        Self::new(
            CompileErrorKind::MixedExceptStar,
            position,
            "cannot have both 'except' and 'except*' on the same 'try'",
        )
    }

    #[must_use]
    pub fn bare_except_star(position: CodeRange) -> Self {
        Self::new(CompileErrorKind::BareExceptStar, position, "'except*' cannot be used without an exception type")
    }

    #[must_use]
    pub fn unsupported(what: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::new(CompileErrorKind::Unsupported, position, what)
    }

    #[must_use]
    pub fn jump_out_of_range(position: CodeRange) -> Self {
        Self::new(CompileErrorKind::JumpOutOfRange, position, "jump target outside bytecode bounds")
    }

    #[must_use]
    pub fn argument_out_of_range(position: CodeRange) -> Self {
        Self::new(CompileErrorKind::ArgumentOutOfRange, position, "opcode argument exceeds 16-bit range")
    }

    #[must_use]
    pub fn multi_target_del(position: CodeRange) -> Self {
        Self::new(
            CompileErrorKind::MultiTargetDelUnsupported,
            position,
            "multi-target 'del' statements are not supported",
        )
    }
}
