// dot.rs — Graphviz DOT output for assembled UGen graphs
//
// Transforms a UGenGraph into DOT format suitable for rendering with `dot`
// or other Graphviz layout engines. Controls become input nodes, UGens are
// coloured by rate, constants are drawn inline next to their consumer.
//
// Preconditions: `graph` is an assembled UGenGraph.
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::graph::{Input, UGenGraph};
use crate::rate::Rate;

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(graph: &UGenGraph) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, graph);
    buf
}

fn write_dot(buf: &mut impl Write, graph: &UGenGraph) -> fmt::Result {
    writeln!(buf, "digraph ugens {{")?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    // Controls
    if !graph.controls.is_empty() {
        writeln!(buf)?;
    }
    for (i, decl) in graph.controls.iter().enumerate() {
        writeln!(
            buf,
            "    k{i} [shape=invhouse, style=filled, fillcolor=lightyellow, label=\"{}.{}\"];",
            escape(&decl.name),
            decl.rate.suffix()
        )?;
    }

    // UGens
    writeln!(buf)?;
    let counts = graph.consumer_counts();
    for (i, ugen) in graph.ugens.iter().enumerate() {
        let mut style = String::from("filled");
        if ugen.flags.is_individual() {
            style.push_str(",dashed");
        }
        let mut attrs = format!(
            "shape=box, style=\"{style}\", fillcolor={}, label=\"{}.{}\"",
            rate_color(ugen.rate),
            escape(&ugen.spec.name),
            ugen.rate.suffix()
        );
        if ugen.flags.has_side_effect() {
            attrs.push_str(", penwidth=2");
        } else if counts[i] == 0 {
            attrs.push_str(", color=gray60, fontcolor=gray40");
        }
        writeln!(buf, "    n{i} [{attrs}];")?;
    }

    // Edges
    writeln!(buf)?;
    let offsets = control_offsets(graph);
    for (i, ugen) in graph.ugens.iter().enumerate() {
        for (j, input) in ugen.inputs.iter().enumerate() {
            match *input {
                Input::Constant { index } => {
                    let value = graph.constants.get(index as usize).copied().unwrap_or(f32::NAN);
                    writeln!(
                        buf,
                        "    n{i}_c{j} [shape=plaintext, fontcolor=gray30, label=\"{value}\"];"
                    )?;
                    writeln!(buf, "    n{i}_c{j} -> n{i} [label=\"{j}\", color=gray60];")?;
                }
                Input::Control { index } => {
                    let owner = offsets.iter().rposition(|&start| start <= index).unwrap_or(0);
                    let width = graph.controls.get(owner).map_or(1, |d| d.defaults.len());
                    if width > 1 {
                        let channel = index - offsets[owner];
                        writeln!(
                            buf,
                            "    k{owner} -> n{i} [label=\"{j}\", taillabel=\"{channel}\"];"
                        )?;
                    } else {
                        writeln!(buf, "    k{owner} -> n{i} [label=\"{j}\"];")?;
                    }
                }
                Input::Node { node, output } => {
                    let src = node.index();
                    let multi = graph.ugens.get(src).is_some_and(|u| u.outputs > 1);
                    if multi {
                        writeln!(
                            buf,
                            "    n{src} -> n{i} [label=\"{j}\", taillabel=\"{output}\"];"
                        )?;
                    } else {
                        writeln!(buf, "    n{src} -> n{i} [label=\"{j}\"];")?;
                    }
                }
            }
        }
    }

    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// First flat channel of each control declaration.
fn control_offsets(graph: &UGenGraph) -> Vec<u32> {
    let mut next = 0u32;
    graph
        .controls
        .iter()
        .map(|decl| {
            let start = next;
            next += decl.defaults.len() as u32;
            start
        })
        .collect()
}

fn rate_color(rate: Rate) -> &'static str {
    match rate {
        Rate::Scalar => "white",
        Rate::Control => "lightsalmon",
        Rate::Audio => "lightblue",
        Rate::Demand => "lightgreen",
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ───────────────────────────────────────────────────────────────────
