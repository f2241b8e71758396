// graph.rs — Assembled UGen graphs
//
// Turns the builder's construction-ordered node list into the flat form a
// synthesis engine consumes: a constant table, control declarations and
// nodes whose inputs are indices into those tables or into earlier nodes.
//
// Preconditions: nodes are in construction order.
// Postconditions: every node reference points strictly backwards; constants
//                 are unique by bit pattern, in first-use order.
// Failure modes: a reference that is not strictly backwards → `ForwardReference`.
// Side effects: dangling nodes are logged at debug level.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::catalog::UGenSpec;
use crate::expand::{Atom, BuildError, BuiltNode};
use crate::ge::Flags;
use crate::id::NodeId;
use crate::rate::Rate;

// ── Public types ────────────────────────────────────────────────────────────

/// A named external control. Each default is one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlDecl {
    pub name: String,
    pub rate: Rate,
    pub defaults: Vec<f32>,
}

/// A resolved node input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Input {
    /// Index into `UGenGraph::constants`.
    Constant { index: u32 },
    /// Flat control channel.
    Control { index: u32 },
    Node { node: NodeId, output: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UGen {
    #[serde(rename = "name", serialize_with = "spec_name")]
    pub spec: Arc<UGenSpec>,
    pub rate: Rate,
    pub inputs: Vec<Input>,
    pub outputs: u32,
    pub flags: Flags,
}

fn spec_name<S: Serializer>(spec: &Arc<UGenSpec>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&spec.name)
}

/// An assembled graph, ready for encoding.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UGenGraph {
    pub constants: Vec<f32>,
    pub controls: Vec<ControlDecl>,
    pub ugens: Vec<UGen>,
}

// ── Assembly ────────────────────────────────────────────────────────────────

pub fn assemble(nodes: Vec<BuiltNode>, controls: Vec<ControlDecl>) -> Result<UGenGraph, BuildError> {
    let mut constants = Vec::new();
    let mut constant_index: HashMap<u32, u32> = HashMap::new();
    let mut ugens = Vec::with_capacity(nodes.len());

    for (i, node) in nodes.into_iter().enumerate() {
        let id = NodeId(i as u32);
        let mut inputs = Vec::with_capacity(node.inputs.len());
        for atom in &node.inputs {
            let input = match *atom {
                Atom::Constant(v) => {
                    let index = *constant_index.entry(v.to_bits()).or_insert_with(|| {
                        constants.push(v);
                        (constants.len() - 1) as u32
                    });
                    Input::Constant { index }
                }
                Atom::Control { index } => Input::Control { index },
                Atom::Output { node: source, output } => {
                    if source >= id {
                        return Err(BuildError::ForwardReference {
                            node: id,
                            input: source,
                        });
                    }
                    Input::Node {
                        node: source,
                        output,
                    }
                }
            };
            inputs.push(input);
        }
        ugens.push(UGen {
            spec: node.spec,
            rate: node.rate,
            inputs,
            outputs: node.outputs,
            flags: node.flags,
        });
    }

    let graph = UGenGraph {
        constants,
        controls,
        ugens,
    };
    for id in graph.dangling() {
        debug!("Dangling node {} ({})", id, graph.ugens[id.index()].spec.name);
    }
    Ok(graph)
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl UGenGraph {
    /// Total number of flat control channels.
    pub fn control_channels(&self) -> u32 {
        self.controls.iter().map(|c| c.defaults.len() as u32).sum()
    }

    /// The declaration owning flat control channel `index`, and the channel
    /// within it.
    pub fn control_channel(&self, index: u32) -> Option<(&ControlDecl, usize)> {
        let mut offset = index as usize;
        for decl in &self.controls {
            if offset < decl.defaults.len() {
                return Some((decl, offset));
            }
            offset -= decl.defaults.len();
        }
        None
    }

    /// Number of inputs reading each node.
    pub fn consumer_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.ugens.len()];
        for ugen in &self.ugens {
            for input in &ugen.inputs {
                if let Input::Node { node, .. } = input {
                    if let Some(c) = counts.get_mut(node.index()) {
                        *c += 1;
                    }
                }
            }
        }
        counts
    }

    /// Pure nodes nothing reads. They are kept; this only reports them.
    pub fn dangling(&self) -> Vec<NodeId> {
        self.consumer_counts()
            .into_iter()
            .zip(&self.ugens)
            .enumerate()
            .filter(|(_, (count, ugen))| *count == 0 && !ugen.flags.has_side_effect())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    pub fn side_effects(&self) -> impl Iterator<Item = (NodeId, &UGen)> {
        self.ugens
            .iter()
            .enumerate()
            .filter(|(_, u)| u.flags.has_side_effect())
            .map(|(i, u)| (NodeId(i as u32), u))
    }

    pub(crate) fn fmt_input(&self, f: &mut impl fmt::Write, input: &Input) -> fmt::Result {
        match *input {
            Input::Constant { index } => match self.constants.get(index as usize) {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "c{}?", index),
            },
            Input::Control { index } => match self.control_channel(index) {
                Some((decl, _)) if decl.defaults.len() == 1 => write!(f, "\\{}", decl.name),
                Some((decl, channel)) => write!(f, "\\{}[{}]", decl.name, channel),
                None => write!(f, "k{}?", index),
            },
            Input::Node { node, output } => match self.ugens.get(node.index()) {
                Some(source) if source.outputs == 1 => write!(f, "{}", node),
                _ => write!(f, "{}[{}]", node, output),
            },
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for UGenGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.controls.is_empty() {
            writeln!(f, "controls:")?;
            for decl in &self.controls {
                let defaults: Vec<String> = decl.defaults.iter().map(|v| v.to_string()).collect();
                writeln!(
                    f,
                    "  {}.{} = [{}]",
                    decl.name,
                    decl.rate.suffix(),
                    defaults.join(", ")
                )?;
            }
        }
        writeln!(f, "ugens:")?;
        for (i, ugen) in self.ugens.iter().enumerate() {
            write!(f, "  {} {}.{}(", NodeId(i as u32), ugen.spec.name, ugen.rate.suffix())?;
            for (j, input) in ugen.inputs.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                self.fmt_input(f, input)?;
            }
            write!(f, ")")?;
            if !ugen.flags.is_empty() {
                write!(f, " !{}", ugen.flags)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn built(name: &str, rate: Rate, inputs: Vec<Atom>) -> BuiltNode {
        let spec = Catalog::standard().lookup(name).unwrap();
        BuiltNode {
            spec: Arc::clone(spec),
            rate,
            inputs,
            outputs: 1,
            flags: spec.flags,
        }
    }

    fn out(node: u32) -> Atom {
        Atom::Output {
            node: NodeId(node),
            output: 0,
        }
    }

    #[test]
    fn constants_deduplicated_in_first_use_order() {
        let nodes = vec![
            built("SinOsc", Rate::Audio, vec![Atom::Constant(440.0), Atom::Constant(0.0)]),
            built("SinOsc", Rate::Audio, vec![Atom::Constant(0.0), Atom::Constant(440.0)]),
            built("LPF", Rate::Audio, vec![Atom::Constant(-0.0), Atom::Constant(440.0)]),
        ];
        let graph = assemble(nodes, Vec::new()).unwrap();
        assert_eq!(graph.constants, vec![440.0, 0.0, -0.0]);
        assert_eq!(
            graph.ugens[1].inputs,
            vec![Input::Constant { index: 1 }, Input::Constant { index: 0 }]
        );
        assert_eq!(graph.ugens[2].inputs[0], Input::Constant { index: 2 });
    }

    #[test]
    fn forward_reference_rejected() {
        let nodes = vec![
            built("LPF", Rate::Audio, vec![out(1), Atom::Constant(1.0)]),
            built("Saw", Rate::Audio, vec![Atom::Constant(1.0)]),
        ];
        assert_eq!(
            assemble(nodes, Vec::new()).unwrap_err(),
            BuildError::ForwardReference {
                node: NodeId(0),
                input: NodeId(1)
            }
        );

        let self_ref = vec![built("LPF", Rate::Audio, vec![out(0)])];
        assert!(assemble(self_ref, Vec::new()).is_err());
    }

    #[test]
    fn dangling_reports_unread_pure_nodes() {
        let nodes = vec![
            built("Saw", Rate::Audio, vec![Atom::Constant(1.0)]),
            built("SinOsc", Rate::Audio, vec![Atom::Constant(1.0), Atom::Constant(0.0)]),
            built("Out", Rate::Audio, vec![Atom::Constant(0.0), out(0)]),
        ];
        let graph = assemble(nodes, Vec::new()).unwrap();
        assert_eq!(graph.dangling(), vec![NodeId(1)]);
        assert_eq!(graph.consumer_counts(), vec![1, 0, 0]);
        assert_eq!(graph.side_effects().count(), 1);
    }

    #[test]
    fn control_channels_are_flat() {
        let graph = UGenGraph {
            controls: vec![
                ControlDecl {
                    name: "freq".to_string(),
                    rate: Rate::Control,
                    defaults: vec![440.0, 443.0],
                },
                ControlDecl {
                    name: "amp".to_string(),
                    rate: Rate::Scalar,
                    defaults: vec![0.1],
                },
            ],
            ..UGenGraph::default()
        };
        assert_eq!(graph.control_channels(), 3);
        assert_eq!(graph.control_channel(1).map(|(d, c)| (d.name.as_str(), c)), Some(("freq", 1)));
        assert_eq!(graph.control_channel(2).map(|(d, c)| (d.name.as_str(), c)), Some(("amp", 0)));
        assert!(graph.control_channel(3).is_none());
    }

    #[test]
    fn display_lists_nodes_with_inputs() {
        let nodes = vec![
            built("SinOsc", Rate::Audio, vec![Atom::Control { index: 1 }, Atom::Constant(0.0)]),
            built("Out", Rate::Audio, vec![Atom::Constant(0.0), out(0)]),
        ];
        let controls = vec![ControlDecl {
            name: "freq".to_string(),
            rate: Rate::Control,
            defaults: vec![440.0, 443.0],
        }];
        let graph = assemble(nodes, controls).unwrap();
        assert_eq!(
            graph.to_string(),
            "controls:\n  freq.kr = [440, 443]\nugens:\n  #0 SinOsc.ar(\\freq[1], 0)\n  #1 Out.ar(0, #0) !side-effect\n"
        );
    }

    #[test]
    fn serializes_spec_by_name() {
        let nodes = vec![built("Saw", Rate::Audio, vec![Atom::Constant(1.0)])];
        let graph = assemble(nodes, Vec::new()).unwrap();
        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["ugens"][0]["name"], "Saw");
        assert_eq!(json["ugens"][0]["rate"], "audio");
        assert_eq!(json["ugens"][0]["inputs"][0]["kind"], "constant");
        assert_eq!(json["ugens"][0]["flags"], serde_json::json!([]));
    }
}
