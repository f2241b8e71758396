// dedup.rs — Structural fingerprints for primitive nodes
//
// Two constructions with the same fingerprint inside one build collapse into
// a single node. The cache is only ever queried by key, so hash iteration
// order never leaks into the output.

use std::collections::HashMap;

use crate::expand::Atom;
use crate::ge::Flags;
use crate::id::NodeId;
use crate::rate::Rate;

/// Identity of one input atom. Constants compare by bit pattern so that
/// `0.0` and `-0.0` (and distinct NaN payloads) stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKey {
    Constant(u32),
    Control(u32),
    Output(NodeId, u32),
}

impl From<&Atom> for AtomKey {
    fn from(atom: &Atom) -> Self {
        match *atom {
            Atom::Constant(v) => AtomKey::Constant(v.to_bits()),
            Atom::Control { index } => AtomKey::Control(index),
            Atom::Output { node, output } => AtomKey::Output(node, output),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub name: String,
    pub rate: Rate,
    pub inputs: Vec<AtomKey>,
    pub outputs: u32,
    pub flags: Flags,
}

impl NodeKey {
    pub fn new(name: &str, rate: Rate, inputs: &[Atom], outputs: u32, flags: Flags) -> Self {
        NodeKey {
            name: name.to_string(),
            rate,
            inputs: inputs.iter().map(AtomKey::from).collect(),
            outputs,
            flags,
        }
    }
}

/// Per-build map from fingerprint to the node first built for it.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: HashMap<NodeKey, NodeId>,
    hits: usize,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, key: &NodeKey) -> Option<NodeId> {
        let found = self.entries.get(key).copied();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    /// Record `id` as the canonical node for `key`. The first insertion wins.
    pub fn insert(&mut self, key: NodeKey, id: NodeId) {
        self.entries.entry(key).or_insert(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of constructions answered from the cache.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(inputs: &[Atom]) -> NodeKey {
        NodeKey::new("SinOsc", Rate::Audio, inputs, 1, Flags::NONE)
    }

    #[test]
    fn lookup_after_insert() {
        let mut cache = DedupCache::new();
        let k = key(&[Atom::Constant(440.0), Atom::Constant(0.0)]);
        assert_eq!(cache.lookup(&k), None);
        cache.insert(k.clone(), NodeId(3));
        assert_eq!(cache.lookup(&k), Some(NodeId(3)));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn first_insertion_wins() {
        let mut cache = DedupCache::new();
        let k = key(&[]);
        cache.insert(k.clone(), NodeId(0));
        cache.insert(k.clone(), NodeId(5));
        assert_eq!(cache.lookup(&k), Some(NodeId(0)));
    }

    #[test]
    fn constants_compare_by_bits() {
        assert_ne!(key(&[Atom::Constant(0.0)]), key(&[Atom::Constant(-0.0)]));
        assert_eq!(key(&[Atom::Constant(f32::NAN)]), key(&[Atom::Constant(f32::NAN)]));
    }

    #[test]
    fn output_slot_is_part_of_the_key() {
        let a = key(&[Atom::Output {
            node: NodeId(0),
            output: 0,
        }]);
        let b = key(&[Atom::Output {
            node: NodeId(0),
            output: 1,
        }]);
        assert_ne!(a, b);
    }

    #[test]
    fn rate_and_flags_are_part_of_the_key() {
        let base = key(&[]);
        let kr = NodeKey::new("SinOsc", Rate::Control, &[], 1, Flags::NONE);
        let side = NodeKey::new("SinOsc", Rate::Audio, &[], 1, Flags::SIDE_EFFECT);
        assert_ne!(base, kr);
        assert_ne!(base, side);
    }
}
