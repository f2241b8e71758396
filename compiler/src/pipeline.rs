// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId: lower (AST → GE roots), build (expansion, rate
// resolution, dedup, assembly), encode (graph → bytes).
//
// Preconditions: Program and Catalog must be set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate
//   display; per-pass timing is logged at debug level.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::ast::{Program, Span};
use crate::catalog::Catalog;
use crate::codec;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::expand::{BuildError, BuildOptions, Builder};
use crate::graph::UGenGraph;
use crate::lower::Root;
use crate::pass::{descriptor, required_passes, PassId};

// ── Artifact storage ───────────────────────────────────────────────────────

pub struct Artifacts {
    pub catalog: Catalog,
    pub program: Program,
    pub roots: Option<Vec<Root>>,
    pub graph: Option<UGenGraph>,
    pub encoded: Option<Vec<u8>>,
}

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.ugs` source text.
/// `catalog_fingerprint`: SHA-256 of `Catalog::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub catalog_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the catalog fingerprint (64 characters).
    pub fn catalog_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.catalog_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"catalog_fingerprint\": \"{}\",\n  \"format_version\": {},\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.catalog_fingerprint_hex(),
            codec::FORMAT_VERSION,
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and catalog.
///
/// The catalog fingerprint is taken over compact canonical JSON, so it does
/// not depend on manifest formatting or load order.
pub fn compute_provenance(source: &str, catalog: &Catalog) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        catalog_fingerprint: sha256(catalog.canonical_json().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub artifacts: Artifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program, catalog: Catalog) -> Self {
        Self {
            artifacts: Artifacts {
                catalog,
                program,
                roots: None,
                graph: None,
                encoded: None,
            },
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, timing, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    debug!(
        "{} complete, {:.1}ms",
        descriptor(pass_id).name,
        elapsed.as_secs_f64() * 1000.0
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Map a build failure onto the source span it belongs to.
pub fn build_diagnostic(err: &BuildError, span: Span) -> Diagnostic {
    let message = err.to_string();
    match err {
        BuildError::ChannelIndex { .. } => Diagnostic::error(codes::E0201, span, message),
        BuildError::RateMismatch { .. } => Diagnostic::error(codes::E0202, span, message)
            .with_hint("demand-rate signals only feed demand-rate inputs"),
        BuildError::BroadcastMismatch { .. } => Diagnostic::error(codes::E0203, span, message)
            .with_hint("without --strict, shorter inputs wrap around"),
        BuildError::ControlConflict { .. } => Diagnostic::error(codes::E0204, span, message),
        BuildError::DepthExceeded { .. } => Diagnostic::error(codes::E0205, span, message),
        BuildError::ForwardReference { .. } => Diagnostic::error(codes::E0206, span, message),
    }
}

/// Expand every root in order; errors point at the failing root statement.
fn build_roots(
    roots: &[Root],
    options: &BuildOptions,
    program_span: Span,
) -> (Option<UGenGraph>, Vec<Diagnostic>) {
    let mut builder = Builder::new(options.clone());
    for root in roots {
        if let Err(e) = builder.expand(&root.ge) {
            return (None, vec![build_diagnostic(&e, root.span)]);
        }
    }
    match builder.finish() {
        Ok(graph) => (Some(graph), Vec::new()),
        Err(e) => (None, vec![build_diagnostic(&e, program_span)]),
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error check.
///
/// Preconditions: `state.artifacts.program` and `state.artifacts.catalog` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &BuildOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Lower => {
                let result =
                    crate::lower::lower(&state.artifacts.program, &state.artifacts.catalog);
                state.artifacts.roots = Some(result.roots);
                result.diagnostics
            }
            PassId::Build => {
                let roots = state.artifacts.roots.as_deref().unwrap_or_default();
                let (graph, diags) = build_roots(roots, options, state.artifacts.program.span);
                state.artifacts.graph = graph;
                diags
            }
            PassId::Encode => match state.artifacts.graph.as_ref().map(codec::encode_graph) {
                Some(Ok(bytes)) => {
                    state.artifacts.encoded = Some(bytes);
                    Vec::new()
                }
                Some(Err(e)) => vec![Diagnostic::error(
                    codes::E0301,
                    state.artifacts.program.span,
                    format!("cannot encode graph: {e}"),
                )],
                None => Vec::new(),
            },
        };
        finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
