// lower.rs — AST → graph elements
//
// Resolves UGen names against the catalog and binding names against the
// statements seen so far, then builds the unexpanded GE tree for every root
// statement. Argument defaults, integer attributes and rate suffixes go
// through `catalog::Call`, so the DSL and the Rust builder API share one
// construction path.
//
// Preconditions: program parsed without errors.
// Postconditions: one `Root` per expression statement, in source order.
//   `let` bindings share their GE, so a bound node expands once however many
//   times it is referenced.
// Failure modes: E0101–E0106 diagnostics; W0101 for unused `let` bindings.
// Side effects: none.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{
    self, CallArg, ControlStmt, Expr, ExprKind, Ident, LetStmt, Program, Span, StatementKind,
};
use crate::catalog::{ArgKind, Call, Catalog, CatalogError, UGenSpec};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::ge::GE;
use crate::rate::Rate;

// ── Output types ────────────────────────────────────────────────────────────

/// A root of the graph: the GE of one expression statement.
#[derive(Debug, Clone)]
pub struct Root {
    pub ge: GE,
    pub span: Span,
}

/// Result of lowering.
#[derive(Debug)]
pub struct LowerResult {
    pub roots: Vec<Root>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == DiagLevel::Error)
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn lower(program: &Program, catalog: &Catalog) -> LowerResult {
    let mut engine = LowerEngine {
        catalog,
        bindings: Vec::new(),
        scope: HashMap::new(),
        roots: Vec::new(),
        diagnostics: Vec::new(),
    };

    for stmt in &program.statements {
        match &stmt.kind {
            StatementKind::Let(s) => engine.lower_let(s),
            StatementKind::Control(s) => engine.lower_control(s),
            StatementKind::Expr(e) => {
                if let Some(ge) = engine.lower_expr(e) {
                    engine.roots.push(Root {
                        ge,
                        span: stmt.span,
                    });
                }
            }
        }
    }
    engine.report_unused();

    debug!(
        "Lowered {} statements into {} roots ({} bindings)",
        program.statements.len(),
        engine.roots.len(),
        engine.bindings.len()
    );

    LowerResult {
        roots: engine.roots,
        diagnostics: engine.diagnostics,
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Let,
    Control,
}

struct Binding {
    name: Ident,
    kind: BindingKind,
    /// `None` when the bound expression failed to lower; references to it
    /// are then silent instead of cascading.
    ge: Option<GE>,
    used: bool,
}

struct LowerEngine<'a> {
    catalog: &'a Catalog,
    bindings: Vec<Binding>,
    scope: HashMap<String, usize>,
    roots: Vec<Root>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> LowerEngine<'a> {
    fn error(&mut self, code: DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(code, span, message));
    }

    // ── Statements ──

    fn lower_let(&mut self, stmt: &LetStmt) {
        let ge = self.lower_expr(&stmt.value);
        self.bind(&stmt.name, BindingKind::Let, ge);
    }

    fn lower_control(&mut self, stmt: &ControlStmt) {
        let rate = match &stmt.rate {
            None => Some(Rate::Control),
            Some(ident) => match self.rate_suffix(ident) {
                Some(Rate::Demand) => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::E0104,
                            ident.span,
                            format!("control `{}` cannot run at demand rate", stmt.name.name),
                        )
                        .with_hint("controls run at ir, kr or ar"),
                    );
                    None
                }
                other => other,
            },
        };
        let ge = rate.map(|rate| {
            let defaults = stmt.defaults.iter().map(|&v| v as f32).collect();
            GE::control(stmt.name.name.clone(), rate, defaults)
        });
        self.bind(&stmt.name, BindingKind::Control, ge);
    }

    fn bind(&mut self, name: &Ident, kind: BindingKind, ge: Option<GE>) {
        if let Some(&existing) = self.scope.get(&name.name) {
            let first = self.bindings[existing].name.span;
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0105,
                    name.span,
                    format!("duplicate binding `{}`", name.name),
                )
                .with_related(first, "first bound here"),
            );
            return;
        }
        self.scope.insert(name.name.clone(), self.bindings.len());
        self.bindings.push(Binding {
            name: name.clone(),
            kind,
            ge,
            used: false,
        });
    }

    fn report_unused(&mut self) {
        for binding in &self.bindings {
            if binding.kind == BindingKind::Let && !binding.used {
                self.diagnostics.push(
                    Diagnostic::warning(
                        codes::W0101,
                        binding.name.span,
                        format!("unused binding `{}`", binding.name.name),
                    )
                    .with_hint("only expression statements become graph roots"),
                );
            }
        }
    }

    // ── Expressions ──

    fn lower_expr(&mut self, expr: &Expr) -> Option<GE> {
        match &expr.kind {
            ExprKind::Number(n) => Some(GE::constant(*n as f32)),
            ExprKind::Array(items) => {
                // Lower every item so each one reports its own errors.
                let lowered: Vec<Option<GE>> = items.iter().map(|e| self.lower_expr(e)).collect();
                lowered.into_iter().collect::<Option<Vec<_>>>().map(GE::Seq)
            }
            ExprKind::Ref(ident) => self.resolve(ident),
            ExprKind::Call(call) => self.lower_call(call, expr.span),
            ExprKind::Channel { source, index } => {
                self.lower_expr(source).map(|ge| ge.channel(*index))
            }
        }
    }

    fn resolve(&mut self, ident: &Ident) -> Option<GE> {
        match self.scope.get(&ident.name) {
            Some(&i) => {
                let binding = &mut self.bindings[i];
                binding.used = true;
                binding.ge.clone()
            }
            None => {
                self.error(
                    codes::E0102,
                    ident.span,
                    format!("unknown binding `{}`", ident.name),
                );
                None
            }
        }
    }

    fn rate_suffix(&mut self, ident: &Ident) -> Option<Rate> {
        let rate = Rate::from_suffix(&ident.name);
        if rate.is_none() {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0104,
                    ident.span,
                    format!("unknown rate `{}`", ident.name),
                )
                .with_hint("expected one of ir, kr, ar, dr"),
            );
        }
        rate
    }

    fn lower_call(&mut self, call: &ast::Call, span: Span) -> Option<GE> {
        let Some(spec) = self.catalog.lookup(&call.name.name).map(Arc::clone) else {
            self.error(
                codes::E0101,
                call.name.span,
                format!("unknown UGen `{}`", call.name.name),
            );
            return None;
        };

        let rate = match &call.rate {
            Some(ident) => Some(self.rate_suffix(ident)?),
            None => None,
        };

        let mut builder = Call::new(Arc::clone(&spec));
        if let Some(rate) = rate {
            builder = builder.rate(rate);
        }

        let mut ok = true;
        let mut seen_named = false;
        for arg in &call.args {
            let value = self.lower_expr(arg.value());
            match arg {
                CallArg::Named(..) => seen_named = true,
                CallArg::Positional(e) if seen_named => {
                    self.error(
                        codes::E0103,
                        e.span,
                        "positional argument after a named argument",
                    );
                    ok = false;
                }
                CallArg::Positional(_) => {}
            }
            let Some(ge) = value else {
                ok = false;
                continue;
            };
            builder = match arg {
                CallArg::Positional(_) => builder.arg(ge),
                CallArg::Named(name, _) => builder.named(name.name.clone(), ge),
            };
        }
        if !ok {
            return None;
        }

        match builder.build() {
            Ok(ge) => Some(ge),
            Err(e) => {
                let diag = call_error(e, &spec, call, span);
                self.diagnostics.push(diag);
                None
            }
        }
    }
}

/// Map a construction error onto the most specific span of the call.
fn call_error(err: CatalogError, spec: &UGenSpec, call: &ast::Call, span: Span) -> Diagnostic {
    let message = err.to_string();
    match &err {
        CatalogError::UnsupportedRate { .. } => {
            let at = call.rate.as_ref().map_or(call.name.span, |r| r.span);
            let hint = if spec.rates.is_empty() {
                "the rate is inferred from the inputs; drop the suffix".to_string()
            } else {
                let rates: Vec<&str> = spec.rates.iter().map(|r| r.suffix()).collect();
                format!("supported rates: {}", rates.join(", "))
            };
            Diagnostic::error(codes::E0104, at, message).with_hint(hint)
        }
        CatalogError::ArgKind { arg, .. } => {
            let is_int = spec
                .arg_index(arg)
                .is_some_and(|i| spec.args[i].kind == ArgKind::Int);
            let code = if is_int { codes::E0106 } else { codes::E0103 };
            Diagnostic::error(code, arg_span(call, spec, arg).unwrap_or(span), message)
        }
        CatalogError::UnknownArg { arg, .. } | CatalogError::DuplicateArg { arg, .. } => {
            let at = call
                .args
                .iter()
                .rev()
                .find_map(|a| match a {
                    CallArg::Named(name, _) if &name.name == arg => Some(name.span),
                    _ => None,
                })
                .unwrap_or(span);
            let names: Vec<&str> = spec.args.iter().map(|a| a.name.as_str()).collect();
            Diagnostic::error(codes::E0103, at, message)
                .with_hint(format!("`{}` takes: {}", spec.name, names.join(", ")))
        }
        _ => Diagnostic::error(codes::E0103, span, message),
    }
}

/// Span of the value given for argument `name`, by name or by position.
fn arg_span(call: &ast::Call, spec: &UGenSpec, name: &str) -> Option<Span> {
    let named = call.args.iter().find_map(|a| match a {
        CallArg::Named(n, value) if n.name == name => Some(value.span),
        _ => None,
    });
    named.or_else(|| {
        let index = spec.arg_index(name)?;
        call.args
            .iter()
            .filter_map(|a| match a {
                CallArg::Positional(value) => Some(value.span),
                CallArg::Named(..) => None,
            })
            .nth(index)
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
