// expand.rs — Multichannel expansion, rate resolution and node construction
//
// Walks GE trees depth-first and turns every primitive application into one
// or more primitive nodes. Expansion, rate resolution and deduplication run
// as one mutually recursive pass: a node's inputs are fully built (adapters
// included) before the node itself, so construction order is already a valid
// topological order.
//
// Preconditions: GE trees were built through the catalog (argument kinds and
//                output counts are consistent with their descriptors).
// Postconditions: every `Atom::Output` refers to a node built earlier.
// Failure modes: channel index, rate, broadcast and control errors → `BuildError`.
// Side effects: none (debug-level tracing only).

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::catalog::{self, ArgSpec, UGenSpec};
use crate::dedup::{DedupCache, NodeKey};
use crate::ge::{Arg, ControlRef, Flags, NodeSpec, GE};
use crate::graph::{self, ControlDecl, UGenGraph};
use crate::id::{IdAllocator, NodeId};
use crate::rate::{check_edge, max_rate, InputRate, MaybeRate, Rate, RateFrom};

/// Nesting limit for GE trees. Expansion and the codec recurse once per
/// level; at this depth both stay well inside the 2 MB stack that spawned
/// threads get by default, in debug builds too.
pub const MAX_EXPAND_DEPTH: usize = 256;

// ── Public types ────────────────────────────────────────────────────────────

/// One channel of an expanded signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Atom {
    Constant(f32),
    /// Flat channel index across all registered controls.
    Control { index: u32 },
    Output { node: NodeId, output: u32 },
}

/// Result of expanding one GE.
#[derive(Debug, Clone, PartialEq)]
pub enum UGenInLike {
    Single(Atom),
    Multi(Vec<Atom>),
}

impl UGenInLike {
    fn from_atoms(mut atoms: Vec<Atom>) -> Self {
        if atoms.len() == 1 {
            UGenInLike::Single(atoms.remove(0))
        } else {
            UGenInLike::Multi(atoms)
        }
    }

    pub fn atoms(&self) -> &[Atom] {
        match self {
            UGenInLike::Single(atom) => std::slice::from_ref(atom),
            UGenInLike::Multi(atoms) => atoms,
        }
    }

    pub fn into_atoms(self) -> Vec<Atom> {
        match self {
            UGenInLike::Single(atom) => vec![atom],
            UGenInLike::Multi(atoms) => atoms,
        }
    }

    pub fn len(&self) -> usize {
        self.atoms().len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms().is_empty()
    }
}

/// What to do when two expanding arguments disagree on channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastPolicy {
    /// Shorter arguments wrap around.
    #[default]
    Cycle,
    /// Any length other than 1 or the widest is an error.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOptions {
    pub broadcast: BroadcastPolicy,
    /// Merge structurally identical non-individual nodes.
    pub dedup: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            broadcast: BroadcastPolicy::Cycle,
            dedup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("channel index {index} out of range for a signal with {channels} channels")]
    ChannelIndex { index: u32, channels: usize },
    #[error("input '{input}' of '{ugen}': cannot use a {from} rate signal where {to} rate is required")]
    RateMismatch {
        ugen: String,
        input: String,
        from: Rate,
        to: Rate,
    },
    #[error("input '{input}' of '{ugen}' has {len} channels, expected 1 or {expected}")]
    BroadcastMismatch {
        ugen: String,
        input: String,
        len: usize,
        expected: usize,
    },
    #[error("control '{name}' redeclared with a different rate or defaults")]
    ControlConflict { name: String },
    #[error("graph nesting exceeds {limit} levels")]
    DepthExceeded { limit: usize },
    #[error("node {node} refers to node {input}, which is not built before it")]
    ForwardReference { node: NodeId, input: NodeId },
}

/// A primitive node as constructed, before assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltNode {
    pub spec: Arc<UGenSpec>,
    pub rate: Rate,
    pub inputs: Vec<Atom>,
    pub outputs: u32,
    pub flags: Flags,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Expand `roots` in order and assemble the resulting graph.
///
/// Recursion is bounded by `MAX_EXPAND_DEPTH`, so any thread with the
/// default 2 MB stack can build any tree; deeper trees fail with
/// `DepthExceeded` instead of overflowing.
pub fn build(roots: &[GE], options: &BuildOptions) -> Result<UGenGraph, BuildError> {
    let mut builder = Builder::new(options.clone());
    for root in roots {
        builder.expand(root)?;
    }
    builder.finish()
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// State of one build. Not shared between builds.
pub struct Builder {
    options: BuildOptions,
    ids: IdAllocator,
    nodes: Vec<BuiltNode>,
    controls: Vec<ControlDecl>,
    /// Control name → (declaration index, first flat channel).
    control_offsets: HashMap<String, (usize, u32)>,
    /// Rate of every flat control channel.
    control_rates: Vec<Rate>,
    cache: DedupCache,
    /// Expansions of shared node allocations, keyed by address. The `Arc`
    /// is held so the address cannot be reused while the entry lives.
    memo: HashMap<usize, (Arc<NodeSpec>, UGenInLike)>,
    depth: usize,
}

impl Builder {
    pub fn new(options: BuildOptions) -> Self {
        Builder {
            options,
            ids: IdAllocator::new(),
            nodes: Vec::new(),
            controls: Vec::new(),
            control_offsets: HashMap::new(),
            control_rates: Vec::new(),
            cache: DedupCache::new(),
            memo: HashMap::new(),
            depth: 0,
        }
    }

    /// Nodes constructed so far, in construction order.
    pub fn nodes(&self) -> &[BuiltNode] {
        &self.nodes
    }

    pub fn expand(&mut self, ge: &GE) -> Result<UGenInLike, BuildError> {
        if self.depth >= MAX_EXPAND_DEPTH {
            return Err(BuildError::DepthExceeded {
                limit: MAX_EXPAND_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.expand_inner(ge);
        self.depth -= 1;
        result
    }

    /// Assemble everything built so far.
    pub fn finish(self) -> Result<UGenGraph, BuildError> {
        debug!(
            "Build finished: {} nodes, {} dedup hits",
            self.nodes.len(),
            self.cache.hits()
        );
        graph::assemble(self.nodes, self.controls)
    }

    fn expand_inner(&mut self, ge: &GE) -> Result<UGenInLike, BuildError> {
        match ge {
            GE::Constant(v) => Ok(UGenInLike::Single(Atom::Constant(*v))),
            GE::Control(control) => self.expand_control(control),
            GE::Seq(items) => {
                let mut atoms = Vec::new();
                for item in items {
                    atoms.extend(self.expand(item)?.into_atoms());
                }
                Ok(UGenInLike::Multi(atoms))
            }
            GE::Proxy(proxy) => {
                let atoms = self.expand(&proxy.source)?.into_atoms();
                match atoms.get(proxy.index as usize) {
                    Some(atom) => Ok(UGenInLike::Single(*atom)),
                    None => Err(BuildError::ChannelIndex {
                        index: proxy.index,
                        channels: atoms.len(),
                    }),
                }
            }
            GE::Node(node) => self.expand_node(node),
        }
    }

    fn expand_control(&mut self, control: &ControlRef) -> Result<UGenInLike, BuildError> {
        let offset = match self.control_offsets.get(&control.name) {
            Some(&(decl, offset)) => {
                let existing = &self.controls[decl];
                let same_defaults = existing
                    .defaults
                    .iter()
                    .map(|v| v.to_bits())
                    .eq(control.defaults.iter().map(|v| v.to_bits()));
                if existing.rate != control.rate || !same_defaults {
                    return Err(BuildError::ControlConflict {
                        name: control.name.clone(),
                    });
                }
                offset
            }
            None => {
                let offset = self.control_rates.len() as u32;
                self.control_offsets
                    .insert(control.name.clone(), (self.controls.len(), offset));
                self.controls.push(ControlDecl {
                    name: control.name.clone(),
                    rate: control.rate,
                    defaults: control.defaults.clone(),
                });
                self.control_rates
                    .extend(std::iter::repeat(control.rate).take(control.defaults.len()));
                offset
            }
        };
        let atoms = (0..control.defaults.len() as u32)
            .map(|i| Atom::Control { index: offset + i })
            .collect();
        Ok(UGenInLike::from_atoms(atoms))
    }

    fn expand_node(&mut self, node: &Arc<NodeSpec>) -> Result<UGenInLike, BuildError> {
        let key = Arc::as_ptr(node) as usize;
        if let Some((_, done)) = self.memo.get(&key) {
            return Ok(done.clone());
        }

        let spec = &node.spec;
        let mut expanded: Vec<Vec<Atom>> = Vec::with_capacity(node.args.len());
        for arg in &node.args {
            match arg {
                Arg::Ge(ge) => expanded.push(self.expand(ge)?.into_atoms()),
                Arg::Int(_) => expanded.push(Vec::new()),
            }
        }

        let width = self.broadcast_width(spec, &expanded)?;
        let mut outs = Vec::with_capacity(width * node.outputs as usize);
        for replica in 0..width {
            let per_arg: Vec<Vec<Atom>> = expanded
                .iter()
                .zip(&spec.args)
                .map(|(atoms, arg_spec)| {
                    if arg_spec.expands() {
                        vec![atoms[replica % atoms.len()]]
                    } else {
                        atoms.clone()
                    }
                })
                .collect();
            let id = self.construct(spec, node.rate, &per_arg, node.outputs, node.flags)?;
            outs.extend((0..node.outputs).map(|output| Atom::Output { node: id, output }));
        }

        let result = if width == 1 && outs.len() == 1 {
            UGenInLike::Single(outs[0])
        } else {
            UGenInLike::Multi(outs)
        };
        self.memo.insert(key, (Arc::clone(node), result.clone()));
        Ok(result)
    }

    /// Number of replicas: the widest expanding argument, or 0 if any
    /// expanding argument is empty.
    fn broadcast_width(&self, spec: &UGenSpec, expanded: &[Vec<Atom>]) -> Result<usize, BuildError> {
        let expanding = || {
            expanded
                .iter()
                .zip(&spec.args)
                .filter(|(_, arg_spec)| arg_spec.expands())
        };

        let mut width = 1;
        for (atoms, _) in expanding() {
            if atoms.is_empty() {
                return Ok(0);
            }
            width = width.max(atoms.len());
        }

        if self.options.broadcast == BroadcastPolicy::Strict {
            if let Some((atoms, arg_spec)) = expanding().find(|(a, _)| a.len() != 1 && a.len() != width) {
                return Err(BuildError::BroadcastMismatch {
                    ugen: spec.name.clone(),
                    input: arg_spec.name.clone(),
                    len: atoms.len(),
                    expected: width,
                });
            }
        }
        Ok(width)
    }

    /// Build one replica: resolve its rate, coerce each input edge, then
    /// hand it to the dedup cache.
    fn construct(
        &mut self,
        spec: &Arc<UGenSpec>,
        declared: MaybeRate,
        per_arg: &[Vec<Atom>],
        outputs: u32,
        flags: Flags,
    ) -> Result<NodeId, BuildError> {
        let rate = self.resolve_rate(spec, declared, per_arg);

        let mut inputs = Vec::new();
        for (atoms, arg_spec) in per_arg.iter().zip(&spec.args) {
            let Some(requirement) = arg_spec.input_rate() else {
                continue;
            };
            for atom in atoms {
                inputs.push(self.coerce(spec, arg_spec, *atom, rate, requirement)?);
            }
        }
        Ok(self.add_node(spec, rate, inputs, outputs, flags))
    }

    fn resolve_rate(&self, spec: &UGenSpec, declared: MaybeRate, per_arg: &[Vec<Atom>]) -> Rate {
        let rate = match declared {
            MaybeRate::Fixed(r) => return r,
            MaybeRate::Infer => match spec.rate_from {
                RateFrom::First => per_arg.iter().flatten().next().map(|a| self.governing_rate(a)),
                RateFrom::Arg(i) => per_arg
                    .get(i)
                    .and_then(|atoms| atoms.first())
                    .map(|a| self.governing_rate(a)),
                RateFrom::Max => per_arg
                    .iter()
                    .flatten()
                    .map(|a| self.governing_rate(a))
                    .reduce(max_rate),
            },
        };
        rate.unwrap_or(Rate::Scalar)
    }

    /// Rate an atom contributes to inference. Constants count as scalar.
    fn governing_rate(&self, atom: &Atom) -> Rate {
        self.producer_rate(atom).unwrap_or(Rate::Scalar)
    }

    /// Rate of the signal behind an atom; `None` for constants, which are
    /// exempt from rate checks.
    fn producer_rate(&self, atom: &Atom) -> Option<Rate> {
        match *atom {
            Atom::Constant(_) => None,
            Atom::Control { index } => self.control_rates.get(index as usize).copied(),
            Atom::Output { node, .. } => self.nodes.get(node.index()).map(|n| n.rate),
        }
    }

    fn coerce(
        &mut self,
        spec: &UGenSpec,
        arg_spec: &ArgSpec,
        atom: Atom,
        node_rate: Rate,
        requirement: InputRate,
    ) -> Result<Atom, BuildError> {
        let Some(producer) = self.producer_rate(&atom) else {
            return Ok(atom);
        };
        let mismatch = |from: Rate, to: Rate| BuildError::RateMismatch {
            ugen: spec.name.clone(),
            input: arg_spec.name.clone(),
            from,
            to,
        };
        match check_edge(producer, node_rate, requirement) {
            Ok(None) => Ok(atom),
            Ok(Some(target)) => {
                let adapter = catalog::adapter(target).ok_or_else(|| mismatch(producer, target))?;
                let id = self.add_node(adapter, target, vec![atom], 1, Flags::NONE);
                debug!(
                    "Adapter {} {} on input '{}' of {}",
                    id, adapter.name, arg_spec.name, spec.name
                );
                Ok(Atom::Output { node: id, output: 0 })
            }
            Err(conflict) => Err(mismatch(conflict.from, conflict.to)),
        }
    }

    fn add_node(
        &mut self,
        spec: &Arc<UGenSpec>,
        rate: Rate,
        inputs: Vec<Atom>,
        outputs: u32,
        flags: Flags,
    ) -> NodeId {
        if !self.options.dedup || flags.is_individual() {
            return self.push_node(spec, rate, inputs, outputs, flags);
        }
        let key = NodeKey::new(&spec.name, rate, &inputs, outputs, flags);
        if let Some(id) = self.cache.lookup(&key) {
            debug!("Reused {} for {}.{}", id, spec.name, rate.suffix());
            return id;
        }
        let id = self.push_node(spec, rate, inputs, outputs, flags);
        self.cache.insert(key, id);
        id
    }

    fn push_node(
        &mut self,
        spec: &Arc<UGenSpec>,
        rate: Rate,
        inputs: Vec<Atom>,
        outputs: u32,
        flags: Flags,
    ) -> NodeId {
        let id = self.ids.alloc_node();
        debug!("Built {} {}.{}", id, spec.name, rate.suffix());
        self.nodes.push(BuiltNode {
            spec: Arc::clone(spec),
            rate,
            inputs,
            outputs,
            flags,
        });
        id
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
