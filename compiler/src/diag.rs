// diag.rs — Unified diagnostics model
//
// Shared diagnostic types for the front end (parse, lower) and for build
// errors mapped back onto source statements.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::Span as _;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0101`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code is never reused for a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Parse
    pub const E0001: DiagCode = DiagCode("E0001");

    // Lowering
    /// Unknown UGen name.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Unknown binding.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Argument count, unknown or duplicate argument name, missing argument.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Unknown or unsupported rate.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Duplicate binding.
    pub const E0105: DiagCode = DiagCode("E0105");
    /// Non-integer value for an integer attribute.
    pub const E0106: DiagCode = DiagCode("E0106");
    /// Unused `let` binding.
    pub const W0101: DiagCode = DiagCode("W0101");

    // Graph building
    pub const E0201: DiagCode = DiagCode("E0201");
    pub const E0202: DiagCode = DiagCode("E0202");
    pub const E0203: DiagCode = DiagCode("E0203");
    pub const E0204: DiagCode = DiagCode("E0204");
    pub const E0205: DiagCode = DiagCode("E0205");
    pub const E0206: DiagCode = DiagCode("E0206");

    // Encoding
    pub const E0301: DiagCode = DiagCode("E0301");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    pub fn warning(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// Render with a `line:col` prefix resolved against `source`.
    pub fn render(&self, path: &str, source: &str) -> String {
        let (line, col) = line_col(source, self.span.start());
        let mut out = format!("{}:{}:{}: {}", path, line, col, self);
        for related in &self.related_spans {
            let (line, col) = line_col(source, related.span.start());
            out.push_str(&format!("\n  {}:{}:{}: {}", path, line, col, related.label));
        }
        out
    }
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, col)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
