use clap::Parser;
use std::path::PathBuf;
use std::process;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ugc::catalog::Catalog;
use ugc::codec;
use ugc::diag::Diagnostic;
use ugc::expand::{BroadcastPolicy, BuildOptions};
use ugc::pass::PassId;
use ugc::pipeline::{self, CompilationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Parsed syntax tree
    Ast,
    /// Unexpanded graph elements, one line per root
    Ge,
    /// Assembled graph, human-readable
    Graph,
    /// Assembled graph as JSON
    Json,
    /// Assembled graph as Graphviz DOT
    Dot,
    /// Binary graph stream written to --output
    Bin,
    /// Source and catalog provenance as JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "ugc",
    version,
    about = "UGen Graph Compiler — expands .ugs graph descriptions into rate-resolved UGen graphs"
)]
struct Cli {
    /// Input .ugs source file
    source: PathBuf,

    /// Output file path (for --emit bin)
    #[arg(short, long, default_value = "a.ugg")]
    output: PathBuf,

    /// UGen catalog manifest, loaded on top of the standard catalog (repeatable)
    #[arg(long)]
    catalog: Vec<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Bin)]
    emit: EmitStage,

    /// Reject multichannel arguments whose lengths disagree instead of wrapping
    #[arg(long)]
    strict: bool,

    /// Keep structurally identical nodes separate
    #[arg(long)]
    no_dedup: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn fail(code: i32, message: impl std::fmt::Display) -> ! {
    eprintln!("ugc: error: {}", message);
    process::exit(code);
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    debug!(source = %cli.source.display(), output = %cli.output.display(), emit = ?cli.emit, "starting");

    // ── Load catalog ──
    let mut catalog = Catalog::standard().clone();
    for path in &cli.catalog {
        match catalog.load_manifest(path) {
            Ok(n) => info!("loaded {} ugens from {}", n, path.display()),
            Err(e) => fail(2, e),
        }
    }
    debug!("{} ugens in catalog", catalog.len());

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => fail(2, format_args!("{}: {}", cli.source.display(), e)),
    };
    let path = cli.source.display().to_string();

    if cli.emit == EmitStage::BuildInfo {
        print!("{}", pipeline::compute_provenance(&source, &catalog).to_json());
        return;
    }

    let parse_result = ugc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            let diag = Diagnostic::error(ugc::diag::codes::E0001, *err.span(), err.to_string());
            eprintln!("{}", diag.render(&path, &source));
        }
        process::exit(1);
    }
    let Some(program) = parse_result.program else {
        fail(1, "parse failed with no output");
    };
    debug!("parsed {} statements", program.statements.len());

    if cli.emit == EmitStage::Ast {
        println!("{:#?}", program);
        return;
    }

    // ── Lower, build, encode ──
    let options = BuildOptions {
        broadcast: if cli.strict {
            BroadcastPolicy::Strict
        } else {
            BroadcastPolicy::Cycle
        },
        dedup: !cli.no_dedup,
    };
    let terminal = match cli.emit {
        EmitStage::Ge => PassId::Lower,
        EmitStage::Bin => PassId::Encode,
        _ => PassId::Build,
    };

    let mut state = CompilationState::new(program, catalog);
    let result = pipeline::run_pipeline(&mut state, terminal, &options, |_, diags| {
        for diag in diags {
            eprintln!("{}", diag.render(&path, &source));
        }
    });
    if result.is_err() || state.has_error {
        process::exit(1);
    }

    let artifacts = state.artifacts;
    match cli.emit {
        EmitStage::Ge => {
            for root in artifacts.roots.unwrap_or_default() {
                println!("{}", root.ge);
            }
        }
        EmitStage::Graph => {
            if let Some(graph) = artifacts.graph {
                print!("{}", graph);
            }
        }
        EmitStage::Json => {
            if let Some(graph) = artifacts.graph {
                match serde_json::to_string_pretty(&graph) {
                    Ok(json) => println!("{}", json),
                    Err(e) => fail(2, e),
                }
            }
        }
        EmitStage::Dot => {
            if let Some(graph) = artifacts.graph {
                print!("{}", ugc::dot::emit_dot(&graph));
            }
        }
        EmitStage::Bin => {
            let bytes = artifacts.encoded.unwrap_or_default();
            if let Err(e) = std::fs::write(&cli.output, &bytes) {
                fail(2, format_args!("{}: {}", cli.output.display(), e));
            }
            info!(
                "wrote {} bytes (format version {}) to {}",
                bytes.len(),
                codec::FORMAT_VERSION,
                cli.output.display()
            );
        }
        EmitStage::Ast | EmitStage::BuildInfo => {}
    }
}
