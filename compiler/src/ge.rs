// ge.rs — Graph elements: the immutable, pre-expansion description of a graph
//
// A GE tree is what catalog code (or the graph description language) builds.
// It is purely descriptive: no node ids, no resolved rates. Composite
// elements hold their children behind `Arc`, so a subtree built once and
// referenced twice is the same allocation; the builder expands it once.
//
// Preconditions: none.
// Postconditions: trees are acyclic by construction (no API creates a cycle).
// Failure modes: none here; range and rate errors surface during expansion.
// Side effects: none.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::UGenSpec;
use crate::rate::{MaybeRate, Rate};

// ── Capability flags ────────────────────────────────────────────────────────

/// One capability a primitive can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Individual,
    SideEffect,
    DoneFlag,
}

impl Flag {
    fn bit(self) -> u8 {
        match self {
            Flag::Individual => 1,
            Flag::SideEffect => 2,
            Flag::DoneFlag => 4,
        }
    }
}

/// Capability bitset attached to descriptors and nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Flag>", into = "Vec<Flag>")]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const INDIVIDUAL: Flags = Flags(1);
    pub const SIDE_EFFECT: Flags = Flags(2);
    pub const DONE_FLAG: Flags = Flags(4);

    const ALL_BITS: u8 = 0b111;

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Rejects bytes carrying unknown capability bits.
    pub fn from_bits(bits: u8) -> Option<Flags> {
        if bits & !Self::ALL_BITS == 0 {
            Some(Flags(bits))
        } else {
            None
        }
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    pub fn is_individual(self) -> bool {
        self.contains(Flags::INDIVIDUAL)
    }

    pub fn has_side_effect(self) -> bool {
        self.contains(Flags::SIDE_EFFECT)
    }

    pub fn has_done_flag(self) -> bool {
        self.contains(Flags::DONE_FLAG)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

impl From<Vec<Flag>> for Flags {
    fn from(list: Vec<Flag>) -> Self {
        Flags(list.into_iter().fold(0, |acc, f| acc | f.bit()))
    }
}

impl From<Flags> for Vec<Flag> {
    fn from(flags: Flags) -> Self {
        [Flag::Individual, Flag::SideEffect, Flag::DoneFlag]
            .into_iter()
            .filter(|f| flags.0 & f.bit() != 0)
            .collect()
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({})", self)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        let names: Vec<&str> = Vec::<Flag>::from(*self)
            .into_iter()
            .map(|flag| match flag {
                Flag::Individual => "individual",
                Flag::SideEffect => "side-effect",
                Flag::DoneFlag => "done",
            })
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

// ── Graph elements ──────────────────────────────────────────────────────────

/// A named external control input. Each default value is one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRef {
    pub name: String,
    pub rate: Rate,
    pub defaults: Vec<f32>,
}

/// Selection of one output channel of another element.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProxy {
    pub source: GE,
    pub index: u32,
}

/// One argument of a primitive: a signal input or an integer attribute
/// (e.g. a channel count) that shapes the node but is not an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Ge(GE),
    Int(i32),
}

/// A catalog primitive applied to arguments.
///
/// Built through `UGenSpec::instantiate` (or `catalog::Call`), which checks
/// argument kinds and fixes `outputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub(crate) spec: Arc<UGenSpec>,
    pub(crate) rate: MaybeRate,
    pub(crate) args: Vec<Arg>,
    pub(crate) flags: Flags,
    pub(crate) outputs: u32,
}

impl NodeSpec {
    pub fn spec(&self) -> &Arc<UGenSpec> {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn rate(&self) -> MaybeRate {
        self.rate
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Output count of one (unexpanded) instance.
    pub fn outputs(&self) -> u32 {
        self.outputs
    }
}

/// A graph element.
#[derive(Debug, Clone, PartialEq)]
pub enum GE {
    Constant(f32),
    Control(Arc<ControlRef>),
    Seq(Vec<GE>),
    Proxy(Arc<ChannelProxy>),
    Node(Arc<NodeSpec>),
}

impl GE {
    pub fn constant(value: f32) -> GE {
        GE::Constant(value)
    }

    pub fn control(name: impl Into<String>, rate: Rate, defaults: Vec<f32>) -> GE {
        GE::Control(Arc::new(ControlRef {
            name: name.into(),
            rate,
            defaults,
        }))
    }

    pub fn seq(items: impl IntoIterator<Item = GE>) -> GE {
        GE::Seq(items.into_iter().collect())
    }

    /// Select output channel `index`. Range is checked at expansion.
    pub fn channel(&self, index: u32) -> GE {
        GE::Proxy(Arc::new(ChannelProxy {
            source: self.clone(),
            index,
        }))
    }

    /// The same primitive, marked so it is never merged with a structurally
    /// identical sibling. Other elements are returned unchanged.
    pub fn individual(&self) -> GE {
        match self {
            GE::Node(node) => GE::Node(Arc::new(NodeSpec {
                flags: node.flags | Flags::INDIVIDUAL,
                ..(**node).clone()
            })),
            other => other.clone(),
        }
    }

    pub fn as_node(&self) -> Option<&NodeSpec> {
        match self {
            GE::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Number of channels this element expands to under the cycling
    /// broadcast policy.
    pub fn num_channels(&self) -> usize {
        match self {
            GE::Constant(_) | GE::Proxy(_) => 1,
            GE::Control(c) => c.defaults.len(),
            GE::Seq(items) => items.iter().map(GE::num_channels).sum(),
            GE::Node(node) => {
                let mut width = 1;
                for (arg, spec) in node.args.iter().zip(&node.spec.args) {
                    if let (Arg::Ge(ge), true) = (arg, spec.expands()) {
                        let n = ge.num_channels();
                        if n == 0 {
                            return 0;
                        }
                        width = width.max(n);
                    }
                }
                width * node.outputs as usize
            }
        }
    }
}

impl From<f32> for GE {
    fn from(value: f32) -> Self {
        GE::Constant(value)
    }
}

impl From<Vec<GE>> for GE {
    fn from(items: Vec<GE>) -> Self {
        GE::Seq(items)
    }
}

impl From<GE> for Arg {
    fn from(ge: GE) -> Self {
        Arg::Ge(ge)
    }
}

impl From<f32> for Arg {
    fn from(value: f32) -> Self {
        Arg::Ge(GE::Constant(value))
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value)
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for GE {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GE::Constant(v) => write!(f, "{}", v),
            GE::Control(c) => write!(f, "\\{}.{}", c.name, c.rate.suffix()),
            GE::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            GE::Proxy(p) => write!(f, "{}[{}]", p.source, p.index),
            GE::Node(node) => {
                write!(f, "{}", node.spec.name)?;
                if let MaybeRate::Fixed(r) = node.rate {
                    write!(f, ".{}", r.suffix())?;
                }
                write!(f, "(")?;
                for (i, arg) in node.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match arg {
                        Arg::Ge(ge) => write!(f, "{}", ge)?,
                        Arg::Int(n) => write!(f, "{}", n)?,
                    }
                }
                write!(f, ")")?;
                let extra = Flags(node.flags.0 & !node.spec.flags.0);
                if !extra.is_empty() {
                    write!(f, "!{}", extra)?;
                }
                Ok(())
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn flag_membership() {
        let f = Flags::SIDE_EFFECT | Flags::DONE_FLAG;
        assert!(f.has_side_effect());
        assert!(f.has_done_flag());
        assert!(!f.is_individual());
        assert_eq!(f.bits(), 6);
        assert_eq!(format!("{f}"), "side-effect|done");
        assert_eq!(format!("{}", Flags::NONE), "-");
    }

    #[test]
    fn flags_reject_unknown_bits() {
        assert_eq!(Flags::from_bits(0b101), Some(Flags::INDIVIDUAL | Flags::DONE_FLAG));
        assert_eq!(Flags::from_bits(0b1000), None);
    }

    #[test]
    fn flags_serialize_as_names() {
        let json = serde_json::to_string(&(Flags::INDIVIDUAL | Flags::SIDE_EFFECT)).unwrap();
        assert_eq!(json, r#"["individual","side_effect"]"#);
        let back: Flags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Flags::INDIVIDUAL | Flags::SIDE_EFFECT);
    }

    #[test]
    fn num_channels_of_literals() {
        assert_eq!(GE::constant(1.0).num_channels(), 1);
        assert_eq!(GE::seq([GE::constant(1.0), GE::constant(2.0), GE::constant(3.0)]).num_channels(), 3);
        assert_eq!(GE::control("freq", Rate::Control, vec![440.0, 442.0]).num_channels(), 2);
        assert_eq!(GE::seq(Vec::new()).num_channels(), 0);
    }

    #[test]
    fn num_channels_of_nodes_broadcasts() {
        let cat = Catalog::standard();
        let sig = cat
            .call("SinOsc")
            .unwrap()
            .ar()
            .arg(GE::seq([GE::constant(100.0), GE::constant(200.0)]))
            .build()
            .unwrap();
        assert_eq!(sig.num_channels(), 2);

        let pan = cat.call("Pan2").unwrap().ar().arg(sig).build().unwrap();
        assert_eq!(pan.num_channels(), 4);
    }

    #[test]
    fn individual_marks_a_fresh_node() {
        let cat = Catalog::standard();
        let sig = cat.call("SinOsc").unwrap().ar().build().unwrap();
        let ind = sig.individual();
        assert!(ind.as_node().unwrap().flags().is_individual());
        assert!(!sig.as_node().unwrap().flags().is_individual());
        assert_eq!(format!("{ind}"), "SinOsc.ar(440, 0)!individual");
    }

    #[test]
    fn display_nested_tree() {
        let cat = Catalog::standard();
        let trig = cat
            .call("Impulse")
            .unwrap()
            .kr()
            .arg(GE::seq([GE::constant(1.0), GE::constant(2.0)]))
            .build()
            .unwrap();
        assert_eq!(format!("{}", trig.channel(1)), "Impulse.kr([1, 2], 0)[1]");
        let ctl = GE::control("amp", Rate::Scalar, vec![0.1]);
        assert_eq!(format!("{ctl}"), "\\amp.ir");
    }
}
