// AST node types for .ugs graph description files.
//
// Every node carries a `SimpleSpan` so that lowering and graph building can
// point diagnostics back at the source.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete graph description: a sequence of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
    pub span: Span,
}

// ── Statements ──

/// A top-level statement with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Let(LetStmt),
    Control(ControlStmt),
    /// A bare expression; becomes a root of the graph.
    Expr(Expr),
}

// ── let_stmt: 'let' IDENT '=' expr ──

#[derive(Debug, Clone, PartialEq)]
pub struct LetStmt {
    pub name: Ident,
    pub value: Expr,
}

// ── control_stmt: 'control' IDENT ('.' IDENT)? '=' (NUMBER | '[' NUMBER, ... ']') ──

#[derive(Debug, Clone, PartialEq)]
pub struct ControlStmt {
    pub name: Ident,
    pub rate: Option<Ident>,
    pub defaults: Vec<f64>,
    /// Span of the default value(s).
    pub defaults_span: Span,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Array(Vec<Expr>),
    /// Reference to a `let` or `control` binding.
    Ref(Ident),
    Call(Call),
    /// Postfix channel selection `expr[n]`.
    Channel { source: Box<Expr>, index: u32 },
}

/// `Name(.rate)?(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: Ident,
    pub rate: Option<Ident>,
    pub args: Vec<CallArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Positional(Expr),
    Named(Ident, Expr),
}

impl CallArg {
    pub fn value(&self) -> &Expr {
        match self {
            CallArg::Positional(e) | CallArg::Named(_, e) => e,
        }
    }
}

// ── Shared ──

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
