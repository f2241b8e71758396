// Conformance tests for the `ugc` binary.
//
// Scope:
// - Language and graph-building rules at the compiler boundary (`ugc --emit graph`)
// - Positive cases must compile and print a non-empty graph
// - Negative cases must be rejected with exit status 1 and the expected
//   diagnostic code on stderr
// - CLI surface: emit stages, options, exit codes, catalog manifests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn ugc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ugc"))
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_dir = std::env::temp_dir();
    tmp_dir.join(format!("{}_{}_{}.{}", prefix, std::process::id(), n, ext))
}

fn write_source(source: &str) -> PathBuf {
    let path = temp_path("ugc_case", "ugs");
    std::fs::write(&path, source).expect("failed to write temporary ugs source");
    path
}

fn run_ugc(args: &[&str]) -> Output {
    Command::new(ugc_binary())
        .args(args)
        .output()
        .expect("failed to execute ugc")
}

/// Compile inline source with extra arguments; the temporary file is removed.
fn run_ugc_inline(source: &str, args: &[&str]) -> Output {
    let path = write_source(source);
    let mut full = vec![path.to_str().unwrap()];
    full.extend_from_slice(args);
    let out = run_ugc(&full);
    let _ = std::fs::remove_file(&path);
    out
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn assert_compiles(case_name: &str, source: &str) {
    let out = run_ugc_inline(source, &["--emit", "graph"]);
    assert!(
        out.status.success(),
        "{case_name}: expected compile success, but failed.\nstdout:\n{}\nstderr:\n{}",
        stdout(&out),
        stderr(&out),
    );
    assert!(
        stdout(&out).contains("ugens:"),
        "{case_name}: graph output is empty"
    );
}

fn assert_rejected(case_name: &str, code: &str, source: &str) {
    let out = run_ugc_inline(source, &["--emit", "graph"]);
    assert_eq!(
        out.status.code(),
        Some(1),
        "{case_name}: expected compile rejection, but got {:?}.\nstderr:\n{}",
        out.status,
        stderr(&out),
    );
    assert!(
        stderr(&out).contains(&format!("[{}]", code)),
        "{case_name}: expected {code} on stderr, got:\n{}",
        stderr(&out),
    );
}

macro_rules! accept {
    ($test_name:ident, $src:expr) => {
        #[test]
        fn $test_name() {
            assert_compiles(stringify!($test_name), $src);
        }
    };
}

macro_rules! reject {
    ($test_name:ident, $code:literal, $src:expr) => {
        #[test]
        fn $test_name() {
            assert_rejected(stringify!($test_name), $code, $src);
        }
    };
}

// ── Lexical structure ─────────────────────────────────────────────────────

accept!(
    comment_lines_ignored,
    concat!(
        "# comment line\n",
        "Out.ar(0, SinOsc.ar(440)) # trailing comment\n",
    )
);

accept!(
    number_literal_forms,
    "Out.ar(0, [SinOsc.ar(4.4e2), SinOsc.ar(-1.5), SinOsc.ar(0)])\n"
);

reject!(stray_character_rejected, "E0001", "Out.ar(0, SinOsc.ar(440) $)\n");

reject!(unclosed_call_rejected, "E0001", "Out.ar(0, SinOsc.ar(440)\n");

// ── Bindings and controls ─────────────────────────────────────────────────

accept!(
    let_binding_shared_by_reference,
    "let s = Saw.ar(110)\nOut.ar(0, [s, s])\n"
);

accept!(
    control_list_defaults,
    "control freq = [220, 330]\nOut.ar(0, SinOsc.ar(freq))\n"
);

accept!(
    scalar_control_rate_suffix,
    "control lvl.ir = 0.5\nOut.ar(0, MulAdd(SinOsc.ar(440, 0), lvl))\n"
);

reject!(unknown_binding_rejected, "E0102", "Out.ar(0, nope)\n");

reject!(
    duplicate_binding_rejected,
    "E0105",
    "let a = 1\nlet a = 2\nOut.ar(0, SinOsc.ar(a))\n"
);

reject!(
    demand_rate_control_rejected,
    "E0104",
    "control c.dr = 1\nOut.kr(0, c)\n"
);

// ── Calls and arguments ───────────────────────────────────────────────────

accept!(
    named_arguments_fill_defaults,
    "Out.ar(0, Decay2.ar(Impulse.ar(2), release: 0.5))\n"
);

reject!(unknown_ugen_rejected, "E0101", "Out.ar(0, Sine.ar(440))\n");

reject!(too_many_arguments_rejected, "E0103", "Out.ar(0, SinOsc.ar(1, 2, 3))\n");

reject!(unknown_argument_name_rejected, "E0103", "Out.ar(0, SinOsc.ar(fre: 1))\n");

reject!(missing_required_argument_rejected, "E0103", "Out.ar(0, Pan2.ar())\n");

reject!(
    positional_after_named_rejected,
    "E0103",
    "Out.ar(0, SinOsc.ar(phase: 1, 2))\n"
);

reject!(unsupported_rate_rejected, "E0104", "Out.ar(0, Rand.ar())\n");

reject!(unknown_rate_rejected, "E0104", "Out.ar(0, SinOsc.xr())\n");

reject!(
    fractional_channel_count_rejected,
    "E0106",
    "Out.ar(0, In.ar(0, numChannels: 1.5))\n"
);

reject!(
    oversized_channel_count_rejected,
    "E0106",
    "Out.ar(0, In.ar(0, numChannels: 3e9))\n"
);

reject!(
    channel_count_above_node_limit_rejected,
    "E0106",
    "Out.ar(0, In.ar(0, numChannels: 100000))\n"
);

// ── Graph building ────────────────────────────────────────────────────────

accept!(
    multichannel_expansion_wraps,
    "Out.ar(0, Pulse.ar([100, 200, 300], [0.1, 0.9]))\n"
);

accept!(
    control_rate_into_audio_input_adapted,
    "Out.ar(0, LFNoise1.kr(1))\n"
);

accept!(
    demand_into_demand_input,
    "Out.ar(0, Saw.ar(Demand.kr(Impulse.kr(4), 0, Dseq.dr(2, [1, 2]))))\n"
);

reject!(
    channel_index_out_of_range_rejected,
    "E0201",
    "Out.ar(0, SinOsc.ar(440)[3])\n"
);

reject!(
    demand_into_audio_input_rejected,
    "E0202",
    "Out.ar(0, Dseq.dr(1, [1]))\n"
);

// ── CLI surface ───────────────────────────────────────────────────────────

fn demo(name: &str) -> String {
    project_root().join("demos").join(name).to_string_lossy().into_owned()
}

#[test]
fn emit_bin_writes_graph_stream() {
    let output = temp_path("ugc_out", "ugg");
    let out = run_ugc(&[&demo("stereo_sine.ugs"), "-o", output.to_str().unwrap()]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    let bytes = std::fs::read(&output).expect("output file must exist");
    let _ = std::fs::remove_file(&output);
    assert_eq!(&bytes[..4], b"UGGR");
    assert_eq!(&bytes[4..6], &[0, 1]);
}

#[test]
fn emit_graph_prints_controls_and_ugens() {
    let out = run_ugc(&[&demo("stereo_sine.ugs"), "--emit", "graph"]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("controls:\n  freq.kr = [440, 443]\n"));
    assert!(text.contains("Out.ar(0, #2[0], #2[1], #3[0], #3[1]) !side-effect"));
}

#[test]
fn emit_json_is_valid() {
    let out = run_ugc(&[&demo("noise_hits.ugs"), "--emit", "json"]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    let value: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("emit json must parse");
    let ugens = value["ugens"].as_array().expect("ugens array");
    assert_eq!(ugens.len(), 6);
    assert_eq!(ugens[0]["name"], "WhiteNoise");
    assert_eq!(value["controls"][0]["name"], "cutoff");
}

#[test]
fn emit_dot_is_a_digraph() {
    let out = run_ugc(&[&demo("sequencer.ugs"), "--emit", "dot"]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("digraph"));
    assert!(text.contains("Dseq"));
    assert!(text.trim_end().ends_with('}'));
}

#[test]
fn emit_ge_prints_one_line_per_root() {
    let out = run_ugc_inline(
        "Out.ar(0, SinOsc.ar(440))\nOut.ar(1, Saw.ar(110))\n",
        &["--emit", "ge"],
    );
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    let text = stdout(&out);
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().next().unwrap().contains("SinOsc"));
}

#[test]
fn emit_ast_prints_program() {
    let out = run_ugc_inline("let x = 1\nOut.ar(0, SinOsc.ar(x))\n", &["--emit", "ast"]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    assert!(stdout(&out).contains("Program"));
}

#[test]
fn emit_build_info_reports_hashes() {
    let out = run_ugc(&[&demo("stereo_sine.ugs"), "--emit", "build-info"]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    let value: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("build-info must parse");
    assert_eq!(value["source_hash"].as_str().map(str::len), Some(64));
    assert_eq!(value["catalog_fingerprint"].as_str().map(str::len), Some(64));
    assert_eq!(value["format_version"], 1);
}

#[test]
fn strict_rejects_mismatched_widths() {
    let source = "Out.ar(0, Pulse.ar([100, 200, 300], [0.1, 0.9]))\n";
    let out = run_ugc_inline(source, &["--emit", "graph", "--strict"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[E0203]"), "stderr:\n{}", err);
    assert!(err.contains(":1:1:"), "diagnostic must point at the root: {}", err);
}

#[test]
fn no_dedup_keeps_identical_nodes() {
    let source = "Out.ar(0, [SinOsc.ar(440), SinOsc.ar(440)])\n";
    let merged = stdout(&run_ugc_inline(source, &["--emit", "graph"]));
    let plain = stdout(&run_ugc_inline(source, &["--emit", "graph", "--no-dedup"]));
    assert_eq!(merged.matches("SinOsc").count(), 1);
    assert_eq!(plain.matches("SinOsc").count(), 2);
}

#[test]
fn unused_binding_warns_but_compiles() {
    let out = run_ugc_inline("let unused = 1\nOut.ar(0, SinOsc.ar(440))\n", &["--emit", "graph"]);
    assert!(out.status.success(), "stderr:\n{}", stderr(&out));
    assert!(stderr(&out).contains("warning[W0101]"));
}

#[test]
fn diagnostics_carry_line_and_column() {
    let out = run_ugc_inline("let a = 1\nOut.ar(0, nope)\n", &["--emit", "graph"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains(".ugs:2:11: error[E0102]: unknown binding `nope`"));
}

#[test]
fn missing_source_exits_with_2() {
    let out = run_ugc(&["/nonexistent/path/graph.ugs", "--emit", "graph"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("ugc: error:"));
}

#[test]
fn bad_catalog_manifest_exits_with_2() {
    let manifest = temp_path("ugc_bad_catalog", "json");
    std::fs::write(&manifest, "{ not json").unwrap();
    let out = run_ugc(&[
        &demo("stereo_sine.ugs"),
        "--emit",
        "graph",
        "--catalog",
        manifest.to_str().unwrap(),
    ]);
    let _ = std::fs::remove_file(&manifest);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("invalid manifest"));
}

#[test]
fn catalog_manifest_adds_ugens() {
    let manifest = temp_path("ugc_catalog", "json");
    std::fs::write(
        &manifest,
        r#"{"ugens": [
            {"name": "Fold", "tag": 200, "rates": ["audio", "control"],
             "args": [{"name": "in", "kind": {"input": {"rate": "node"}}},
                      {"name": "lo", "default": -1},
                      {"name": "hi", "default": 1}]}
        ]}"#,
    )
    .unwrap();
    let source = "Out.ar(0, Fold.ar(Saw.ar(55), hi: 0.5))\n";

    let without = run_ugc_inline(source, &["--emit", "graph"]);
    assert_eq!(without.status.code(), Some(1));
    assert!(stderr(&without).contains("E0101"));

    let with = run_ugc_inline(source, &["--emit", "graph", "--catalog", manifest.to_str().unwrap()]);
    let _ = std::fs::remove_file(&manifest);
    assert!(with.status.success(), "stderr:\n{}", stderr(&with));
    assert!(stdout(&with).contains("#1 Fold.ar(#0, -1, 0.5)"));
}
