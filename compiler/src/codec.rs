// codec.rs — Binary form of GE trees and assembled graphs
//
// Streams start with a 4-byte magic and a u16 format version. The body is a
// sequence of records: `tag: u16`, `arity: u16`, then `arity` fields, each
// introduced by a one-byte kind. Decoding dispatches on the tag through a
// `CodecRegistry`; the stored arity is checked against the registered one
// before any field is read. All integers are big-endian.
//
// Preconditions: decoding uses a registry built from the catalog the stream
//                was encoded against.
// Postconditions: `decode(encode(x)) == x`; node sharing in GE trees survives
//                 the round trip.
// Failure modes: malformed input → `CodecError`; no partial result escapes.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::catalog::{ArgKind, Catalog, UGenSpec};
use crate::expand::MAX_EXPAND_DEPTH;
use crate::ge::{Arg, ChannelProxy, ControlRef, Flags, GE};
use crate::graph::{ControlDecl, Input, UGen, UGenGraph};
use crate::id::NodeId;
use crate::rate::{MaybeRate, Rate};

pub const GE_MAGIC: [u8; 4] = *b"UGGE";
pub const GRAPH_MAGIC: [u8; 4] = *b"UGGR";
pub const FORMAT_VERSION: u16 = 1;

/// Record tags below the catalog range.
pub mod tag {
    pub const CONSTANT: u16 = 0;
    pub const CONTROL: u16 = 1;
    pub const SEQ: u16 = 2;
    pub const PROXY: u16 = 3;
    /// Reference to an already decoded node record.
    pub const BACKREF: u16 = 4;
}

/// Field kind bytes.
mod kind {
    pub const RATE: u8 = b'r';
    pub const MAYBE_RATE: u8 = b'm';
    pub const GE: u8 = b'g';
    pub const GE_LIST: u8 = b'G';
    pub const F32: u8 = b'f';
    pub const F32_LIST: u8 = b'F';
    pub const STRING: u8 = b's';
    pub const I32: u8 = b'i';
    pub const FLAGS: u8 = b'x';
    pub const ATOMS: u8 = b'a';

    pub const ATOM_CONSTANT: u8 = b'c';
    pub const ATOM_CONTROL: u8 = b'k';
    pub const ATOM_NODE: u8 = b'n';
}

/// Fields of a node record in a graph stream: rate, inputs, outputs, flags.
const GRAPH_NODE_ARITY: u16 = 4;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record with tag {tag} has {found} fields, expected {expected}")]
    Arity { tag: u16, expected: u16, found: u16 },
    #[error("unknown record tag {0}")]
    UnknownType(u16),
    #[error("expected field of kind '{expected}', found '{found}'")]
    FieldKind { expected: char, found: char },
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("{0} trailing bytes after the last record")]
    TrailingBytes(usize),
    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("records nested more than {limit} levels deep")]
    DepthExceeded { limit: usize },
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::UnexpectedEof
        } else {
            CodecError::Io(e)
        }
    }
}

fn malformed(message: impl Into<String>) -> CodecError {
    CodecError::Malformed(message.into())
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Reads the fields of one record whose tag and arity were already checked.
pub type ReadFn = Box<dyn Fn(&mut Decoder<'_>) -> Result<GE, CodecError> + Send + Sync>;

struct Entry {
    arity: u16,
    read: ReadFn,
    spec: Option<Arc<UGenSpec>>,
}

/// Tag → reader table. Built once, read-only afterwards.
pub struct CodecRegistry {
    entries: HashMap<u16, Entry>,
}

static STANDARD: Lazy<CodecRegistry> = Lazy::new(|| CodecRegistry::from_catalog(Catalog::standard()));

impl CodecRegistry {
    /// Registry with only the built-in records (no primitives).
    pub fn builtin() -> Self {
        let mut registry = CodecRegistry {
            entries: HashMap::new(),
        };
        registry.register(tag::CONSTANT, 1, |d| Ok(GE::Constant(d.read_f32()?)));
        registry.register(tag::CONTROL, 3, |d| {
            let name = d.read_string()?;
            let rate = d.read_rate()?;
            let defaults = d.read_f32_list()?;
            Ok(GE::Control(Arc::new(ControlRef {
                name,
                rate,
                defaults,
            })))
        });
        registry.register(tag::SEQ, 1, |d| Ok(GE::Seq(d.read_ge_list()?)));
        registry.register(tag::PROXY, 2, |d| {
            let source = d.read_ge()?;
            let index = d.read_i32()?;
            let index = u32::try_from(index).map_err(|_| malformed(format!("negative channel index {}", index)))?;
            Ok(GE::Proxy(Arc::new(ChannelProxy { source, index })))
        });
        registry.register(tag::BACKREF, 1, |d| {
            let index = d.read_i32()?;
            usize::try_from(index)
                .ok()
                .and_then(|i| d.shared.get(i))
                .cloned()
                .ok_or_else(|| malformed(format!("back-reference {} to an undecoded node", index)))
        });
        registry
    }

    /// Built-in records plus one entry per catalog primitive.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut registry = Self::builtin();
        for spec in catalog.ugens() {
            registry.register_ugen(Arc::clone(spec));
        }
        registry
    }

    /// Registry for the standard catalog.
    pub fn standard() -> &'static CodecRegistry {
        &STANDARD
    }

    pub fn register(
        &mut self,
        tag: u16,
        arity: u16,
        read: impl Fn(&mut Decoder<'_>) -> Result<GE, CodecError> + Send + Sync + 'static,
    ) {
        self.entries.insert(
            tag,
            Entry {
                arity,
                read: Box::new(read),
                spec: None,
            },
        );
    }

    fn register_ugen(&mut self, spec: Arc<UGenSpec>) {
        let arity = u16::try_from(2 + spec.args.len()).unwrap_or(u16::MAX);
        let reader = Arc::clone(&spec);
        self.entries.insert(
            spec.tag,
            Entry {
                arity,
                read: Box::new(move |d: &mut Decoder<'_>| read_ugen(&reader, d)),
                spec: Some(spec),
            },
        );
    }

    /// Registered field count for `tag`.
    pub fn arity(&self, tag: u16) -> Option<u16> {
        self.entries.get(&tag).map(|e| e.arity)
    }

    /// Descriptor behind a primitive tag.
    pub fn spec(&self, tag: u16) -> Option<&Arc<UGenSpec>> {
        self.entries.get(&tag).and_then(|e| e.spec.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<u16> = self.entries.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("CodecRegistry").field("tags", &tags).finish()
    }
}

/// Generic reader for every catalog primitive: rate, flags, then one field
/// per declared argument.
fn read_ugen(spec: &Arc<UGenSpec>, d: &mut Decoder<'_>) -> Result<GE, CodecError> {
    let rate = d.read_maybe_rate()?;
    let flags = d.read_flags()?;
    let mut args = Vec::with_capacity(spec.args.len());
    for arg_spec in &spec.args {
        let arg = match arg_spec.kind {
            ArgKind::Int => Arg::Int(d.read_i32()?),
            ArgKind::Input { .. } => Arg::Ge(d.read_ge()?),
        };
        args.push(arg);
    }
    let node = spec
        .instantiate(rate, args, flags)
        .map_err(|e| malformed(e.to_string()))?;
    let ge = GE::Node(Arc::new(node));
    d.shared.push(ge.clone());
    Ok(ge)
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// Encode a GE tree. A node allocation reached twice is written once and
/// referenced afterwards.
pub fn encode_ge(root: &GE) -> Result<Vec<u8>, CodecError> {
    let mut e = Encoder::new(GE_MAGIC)?;
    e.ge_record(root)?;
    Ok(e.buf)
}

pub fn encode_graph(graph: &UGenGraph) -> Result<Vec<u8>, CodecError> {
    let mut e = Encoder::new(GRAPH_MAGIC)?;

    e.count(graph.constants.len())?;
    for v in &graph.constants {
        e.buf.write_f32::<BigEndian>(*v)?;
    }

    e.count(graph.controls.len())?;
    for decl in &graph.controls {
        e.string(&decl.name)?;
        e.rate(decl.rate)?;
        e.f32_list(&decl.defaults)?;
    }

    e.count(graph.ugens.len())?;
    for ugen in &graph.ugens {
        e.record(ugen.spec.tag, GRAPH_NODE_ARITY)?;
        e.rate(ugen.rate)?;
        e.inputs(&ugen.inputs)?;
        let outputs = i32::try_from(ugen.outputs).map_err(|_| malformed("output count too large"))?;
        e.i32(outputs)?;
        e.flags(ugen.flags)?;
    }
    Ok(e.buf)
}

struct Encoder {
    buf: Vec<u8>,
    /// Node allocation → index among written node records.
    shared: HashMap<usize, u32>,
    next_shared: u32,
    depth: usize,
}

impl Encoder {
    fn new(magic: [u8; 4]) -> Result<Self, CodecError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&magic);
        buf.write_u16::<BigEndian>(FORMAT_VERSION)?;
        Ok(Encoder {
            buf,
            shared: HashMap::new(),
            next_shared: 0,
            depth: 0,
        })
    }

    fn record(&mut self, tag: u16, arity: u16) -> Result<(), CodecError> {
        self.buf.write_u16::<BigEndian>(tag)?;
        self.buf.write_u16::<BigEndian>(arity)?;
        Ok(())
    }

    fn count(&mut self, n: usize) -> Result<(), CodecError> {
        let n = u32::try_from(n).map_err(|_| malformed("sequence too long"))?;
        self.buf.write_u32::<BigEndian>(n)?;
        Ok(())
    }

    fn rate(&mut self, rate: Rate) -> Result<(), CodecError> {
        self.buf.write_u8(kind::RATE)?;
        self.buf.write_u8(rate.id())?;
        Ok(())
    }

    fn maybe_rate(&mut self, rate: MaybeRate) -> Result<(), CodecError> {
        self.buf.write_u8(kind::MAYBE_RATE)?;
        self.buf.write_u8(rate.id())?;
        Ok(())
    }

    fn f32(&mut self, v: f32) -> Result<(), CodecError> {
        self.buf.write_u8(kind::F32)?;
        self.buf.write_f32::<BigEndian>(v)?;
        Ok(())
    }

    fn f32_list(&mut self, values: &[f32]) -> Result<(), CodecError> {
        self.buf.write_u8(kind::F32_LIST)?;
        self.count(values.len())?;
        for v in values {
            self.buf.write_f32::<BigEndian>(*v)?;
        }
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<(), CodecError> {
        let len = u16::try_from(s.len()).map_err(|_| malformed(format!("string of {} bytes", s.len())))?;
        self.buf.write_u8(kind::STRING)?;
        self.buf.write_u16::<BigEndian>(len)?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.buf.write_u8(kind::I32)?;
        self.buf.write_i32::<BigEndian>(v)?;
        Ok(())
    }

    fn flags(&mut self, flags: Flags) -> Result<(), CodecError> {
        self.buf.write_u8(kind::FLAGS)?;
        self.buf.write_u8(flags.bits())?;
        Ok(())
    }

    fn inputs(&mut self, inputs: &[Input]) -> Result<(), CodecError> {
        self.buf.write_u8(kind::ATOMS)?;
        self.count(inputs.len())?;
        for input in inputs {
            match *input {
                Input::Constant { index } => {
                    self.buf.write_u8(kind::ATOM_CONSTANT)?;
                    self.buf.write_u32::<BigEndian>(index)?;
                }
                Input::Control { index } => {
                    self.buf.write_u8(kind::ATOM_CONTROL)?;
                    self.buf.write_u32::<BigEndian>(index)?;
                }
                Input::Node { node, output } => {
                    self.buf.write_u8(kind::ATOM_NODE)?;
                    self.buf.write_u32::<BigEndian>(node.0)?;
                    self.buf.write_u32::<BigEndian>(output)?;
                }
            }
        }
        Ok(())
    }

    fn ge(&mut self, ge: &GE) -> Result<(), CodecError> {
        self.buf.write_u8(kind::GE)?;
        self.ge_record(ge)
    }

    fn ge_record(&mut self, ge: &GE) -> Result<(), CodecError> {
        if self.depth >= MAX_EXPAND_DEPTH {
            return Err(CodecError::DepthExceeded {
                limit: MAX_EXPAND_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.ge_record_fields(ge);
        self.depth -= 1;
        result
    }

    fn ge_record_fields(&mut self, ge: &GE) -> Result<(), CodecError> {
        match ge {
            GE::Constant(v) => {
                self.record(tag::CONSTANT, 1)?;
                self.f32(*v)
            }
            GE::Control(c) => {
                self.record(tag::CONTROL, 3)?;
                self.string(&c.name)?;
                self.rate(c.rate)?;
                self.f32_list(&c.defaults)
            }
            GE::Seq(items) => {
                self.record(tag::SEQ, 1)?;
                self.buf.write_u8(kind::GE_LIST)?;
                self.count(items.len())?;
                for item in items {
                    self.ge_record(item)?;
                }
                Ok(())
            }
            GE::Proxy(p) => {
                let index = i32::try_from(p.index).map_err(|_| malformed("channel index too large"))?;
                self.record(tag::PROXY, 2)?;
                self.ge(&p.source)?;
                self.i32(index)
            }
            GE::Node(node) => {
                let key = Arc::as_ptr(node) as usize;
                if let Some(&index) = self.shared.get(&key) {
                    self.record(tag::BACKREF, 1)?;
                    return self.i32(index as i32);
                }
                let arity = u16::try_from(2 + node.args().len())
                    .map_err(|_| malformed(format!("'{}' has too many arguments", node.name())))?;
                self.record(node.spec().tag, arity)?;
                self.maybe_rate(node.rate())?;
                self.flags(node.flags())?;
                for arg in node.args() {
                    match arg {
                        Arg::Ge(ge) => self.ge(ge)?,
                        Arg::Int(n) => self.i32(*n)?,
                    }
                }
                // Indices follow completion order, matching the decoder.
                self.shared.insert(key, self.next_shared);
                self.next_shared += 1;
                Ok(())
            }
        }
    }
}

// ── Decoding ────────────────────────────────────────────────────────────────

pub fn decode_ge(bytes: &[u8], registry: &CodecRegistry) -> Result<GE, CodecError> {
    let mut d = Decoder::new(bytes, registry);
    d.header(GE_MAGIC)?;
    let root = d.read_record()?;
    d.finish()?;
    Ok(root)
}

pub fn decode_graph(bytes: &[u8], registry: &CodecRegistry) -> Result<UGenGraph, CodecError> {
    let mut d = Decoder::new(bytes, registry);
    d.header(GRAPH_MAGIC)?;

    let n = d.read_count()?;
    let mut constants = Vec::new();
    for _ in 0..n {
        constants.push(d.input.read_f32::<BigEndian>()?);
    }

    let n = d.read_count()?;
    let mut controls = Vec::new();
    for _ in 0..n {
        let name = d.read_string()?;
        let rate = d.read_rate()?;
        let defaults = d.read_f32_list()?;
        controls.push(ControlDecl {
            name,
            rate,
            defaults,
        });
    }
    let control_channels: usize = controls.iter().map(|c| c.defaults.len()).sum();

    let n = d.read_count()?;
    let mut ugens: Vec<UGen> = Vec::new();
    for i in 0..n {
        let tag = d.input.read_u16::<BigEndian>()?;
        let arity = d.input.read_u16::<BigEndian>()?;
        let spec = registry.spec(tag).ok_or(CodecError::UnknownType(tag))?;
        if arity != GRAPH_NODE_ARITY {
            return Err(CodecError::Arity {
                tag,
                expected: GRAPH_NODE_ARITY,
                found: arity,
            });
        }
        let rate = d.read_rate()?;
        let inputs = d.read_inputs()?;
        let outputs = d.read_i32()?;
        let outputs = u32::try_from(outputs).map_err(|_| malformed(format!("negative output count {}", outputs)))?;
        let flags = d.read_flags()?;

        for input in &inputs {
            let ok = match *input {
                Input::Constant { index } => (index as usize) < constants.len(),
                Input::Control { index } => (index as usize) < control_channels,
                Input::Node { node, output } => {
                    node.0 < i && ugens.get(node.index()).is_some_and(|u| output < u.outputs)
                }
            };
            if !ok {
                return Err(malformed(format!("node {} has an invalid input {:?}", i, input)));
            }
        }

        ugens.push(UGen {
            spec: Arc::clone(spec),
            rate,
            inputs,
            outputs,
            flags,
        });
    }

    d.finish()?;
    Ok(UGenGraph {
        constants,
        controls,
        ugens,
    })
}

/// Read side of the codec, handed to registered readers.
pub struct Decoder<'a> {
    input: Cursor<&'a [u8]>,
    registry: &'a CodecRegistry,
    /// Node records decoded so far, for back-references.
    shared: Vec<GE>,
    /// Records currently open; bounded so hostile input cannot exhaust the stack.
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8], registry: &'a CodecRegistry) -> Self {
        Decoder {
            input: Cursor::new(bytes),
            registry,
            shared: Vec::new(),
            depth: 0,
        }
    }

    fn header(&mut self, magic: [u8; 4]) -> Result<(), CodecError> {
        let mut found = [0u8; 4];
        self.input.read_exact(&mut found)?;
        if found != magic {
            return Err(CodecError::BadMagic(found));
        }
        let version = self.input.read_u16::<BigEndian>()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), CodecError> {
        let len = self.input.get_ref().len() as u64;
        let remaining = len.saturating_sub(self.input.position());
        if remaining > 0 {
            return Err(CodecError::TrailingBytes(remaining as usize));
        }
        Ok(())
    }

    fn expect_kind(&mut self, expected: u8) -> Result<(), CodecError> {
        let found = self.input.read_u8()?;
        if found != expected {
            return Err(CodecError::FieldKind {
                expected: expected as char,
                found: found as char,
            });
        }
        Ok(())
    }

    fn read_count(&mut self) -> Result<u32, CodecError> {
        Ok(self.input.read_u32::<BigEndian>()?)
    }

    /// One record: tag and arity, checked against the registry, then its
    /// fields through the registered reader.
    fn read_record(&mut self) -> Result<GE, CodecError> {
        if self.depth >= MAX_EXPAND_DEPTH {
            return Err(CodecError::DepthExceeded {
                limit: MAX_EXPAND_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.read_record_fields();
        self.depth -= 1;
        result
    }

    fn read_record_fields(&mut self) -> Result<GE, CodecError> {
        let tag = self.input.read_u16::<BigEndian>()?;
        let arity = self.input.read_u16::<BigEndian>()?;
        let registry = self.registry;
        let entry = registry.entries.get(&tag).ok_or(CodecError::UnknownType(tag))?;
        if arity != entry.arity {
            return Err(CodecError::Arity {
                tag,
                expected: entry.arity,
                found: arity,
            });
        }
        (entry.read)(self)
    }

    pub fn read_rate(&mut self) -> Result<Rate, CodecError> {
        self.expect_kind(kind::RATE)?;
        let id = self.input.read_u8()?;
        Rate::from_id(id).ok_or_else(|| malformed(format!("unknown rate id {}", id)))
    }

    pub fn read_maybe_rate(&mut self) -> Result<MaybeRate, CodecError> {
        self.expect_kind(kind::MAYBE_RATE)?;
        let id = self.input.read_u8()?;
        MaybeRate::from_id(id).ok_or_else(|| malformed(format!("unknown rate id {}", id)))
    }

    pub fn read_ge(&mut self) -> Result<GE, CodecError> {
        self.expect_kind(kind::GE)?;
        self.read_record()
    }

    pub fn read_ge_list(&mut self) -> Result<Vec<GE>, CodecError> {
        self.expect_kind(kind::GE_LIST)?;
        let n = self.read_count()?;
        let mut items = Vec::new();
        for _ in 0..n {
            items.push(self.read_record()?);
        }
        Ok(items)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.expect_kind(kind::F32)?;
        Ok(self.input.read_f32::<BigEndian>()?)
    }

    pub fn read_f32_list(&mut self) -> Result<Vec<f32>, CodecError> {
        self.expect_kind(kind::F32_LIST)?;
        let n = self.read_count()?;
        let mut values = Vec::new();
        for _ in 0..n {
            values.push(self.input.read_f32::<BigEndian>()?);
        }
        Ok(values)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        self.expect_kind(kind::STRING)?;
        let len = self.input.read_u16::<BigEndian>()?;
        let mut bytes = vec![0u8; len as usize];
        self.input.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| malformed("string is not UTF-8"))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.expect_kind(kind::I32)?;
        Ok(self.input.read_i32::<BigEndian>()?)
    }

    pub fn read_flags(&mut self) -> Result<Flags, CodecError> {
        self.expect_kind(kind::FLAGS)?;
        let bits = self.input.read_u8()?;
        Flags::from_bits(bits).ok_or_else(|| malformed(format!("unknown flag bits {:#04x}", bits)))
    }

    fn read_inputs(&mut self) -> Result<Vec<Input>, CodecError> {
        self.expect_kind(kind::ATOMS)?;
        let n = self.read_count()?;
        let mut inputs = Vec::new();
        for _ in 0..n {
            let input = match self.input.read_u8()? {
                kind::ATOM_CONSTANT => Input::Constant {
                    index: self.input.read_u32::<BigEndian>()?,
                },
                kind::ATOM_CONTROL => Input::Control {
                    index: self.input.read_u32::<BigEndian>()?,
                },
                kind::ATOM_NODE => {
                    let node = NodeId(self.input.read_u32::<BigEndian>()?);
                    let output = self.input.read_u32::<BigEndian>()?;
                    Input::Node { node, output }
                }
                other => return Err(malformed(format!("unknown input kind '{}'", other as char))),
            };
            inputs.push(input);
        }
        Ok(inputs)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Call;
    use crate::expand::{build, BuildOptions};

    fn call(name: &str) -> Call {
        Catalog::standard().call(name).unwrap()
    }

    fn registry() -> &'static CodecRegistry {
        CodecRegistry::standard()
    }

    fn sample_tree() -> GE {
        let freq = GE::control("freq", Rate::Control, vec![440.0, 443.0]);
        let sig = call("SinOsc").ar().arg(freq).build().unwrap();
        let pan = call("Pan2").ar().arg(sig.channel(0)).arg(-0.5_f32).build().unwrap();
        let input = call("In").kr().arg(4.0_f32).arg(2_i32).build().unwrap();
        call("Out")
            .ar()
            .arg(0.0_f32)
            .arg(GE::seq([pan, input.individual()]))
            .build()
            .unwrap()
    }

    #[test]
    fn ge_round_trip() {
        let tree = sample_tree();
        let bytes = encode_ge(&tree).unwrap();
        assert_eq!(&bytes[..4], b"UGGE");
        let back = decode_ge(&bytes, registry()).unwrap();
        assert_eq!(back, tree);
        assert_eq!(encode_ge(&back).unwrap(), bytes);
    }

    #[test]
    fn sharing_survives_round_trip() {
        let noise = call("WhiteNoise").ar().build().unwrap();
        let tree = GE::seq([noise.clone(), noise]);
        let bytes = encode_ge(&tree).unwrap();
        let back = decode_ge(&bytes, registry()).unwrap();
        let GE::Seq(items) = &back else {
            panic!("expected a sequence, got {back}");
        };
        match (&items[0], &items[1]) {
            (GE::Node(a), GE::Node(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("expected nodes, got {other:?}"),
        }
        let graph = build(&[back], &BuildOptions::default()).unwrap();
        assert_eq!(graph.ugens.len(), 1);
    }

    #[test]
    fn graph_round_trip() {
        let graph = build(&[sample_tree()], &BuildOptions::default()).unwrap();
        let bytes = encode_graph(&graph).unwrap();
        assert_eq!(&bytes[..4], b"UGGR");
        let back = decode_graph(&bytes, registry()).unwrap();
        assert_eq!(back, graph);
        assert_eq!(encode_graph(&back).unwrap(), bytes);
    }

    #[test]
    fn two_node_list_round_trip() {
        let trig = GE::seq([GE::constant(1.0), GE::constant(0.0)]);
        let decay = call("Decay").kr().arg(trig).arg(0.5_f32).build().unwrap();
        let graph = build(&[decay], &BuildOptions::default()).unwrap();
        assert_eq!(graph.ugens.len(), 2);
        let back = decode_graph(&encode_graph(&graph).unwrap(), registry()).unwrap();
        for (a, b) in graph.ugens.iter().zip(&back.ugens) {
            assert_eq!(a.rate, b.rate);
            assert_eq!(a.inputs, b.inputs);
        }
        assert_eq!(back.constants, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn arity_checked_before_fields() {
        let sig = call("SinOsc").ar().build().unwrap();
        let mut bytes = encode_ge(&sig).unwrap();
        assert_eq!(&bytes[8..10], &[0, 4]);
        bytes[8..10].copy_from_slice(&3u16.to_be_bytes());
        assert!(matches!(
            decode_ge(&bytes, registry()),
            Err(CodecError::Arity {
                tag: 16,
                expected: 4,
                found: 3
            })
        ));
    }

    #[test]
    fn graph_node_arity_checked() {
        let sig = call("Saw").ar().build().unwrap();
        let graph = build(&[sig], &BuildOptions::default()).unwrap();
        let mut bytes = encode_graph(&graph).unwrap();
        // magic, version, 1 constant, 0 controls, 1 node, then tag and arity
        let arity_at = 6 + 4 + 4 + 4 + 4 + 2;
        assert_eq!(&bytes[arity_at..arity_at + 2], &[0, 4]);
        bytes[arity_at..arity_at + 2].copy_from_slice(&3u16.to_be_bytes());
        assert!(matches!(
            decode_graph(&bytes, registry()),
            Err(CodecError::Arity { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn header_errors() {
        let bytes = encode_ge(&GE::constant(1.0)).unwrap();

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(decode_ge(&bad, registry()), Err(CodecError::BadMagic(_))));

        let mut bad = bytes.clone();
        bad[4..6].copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(
            decode_ge(&bad, registry()),
            Err(CodecError::UnsupportedVersion(2))
        ));

        assert!(matches!(
            decode_graph(&bytes, registry()),
            Err(CodecError::BadMagic(m)) if &m == b"UGGE"
        ));
    }

    #[test]
    fn truncated_and_trailing_input() {
        let bytes = encode_ge(&sample_tree()).unwrap();
        for cut in [3, 7, bytes.len() / 2, bytes.len() - 1] {
            assert!(
                matches!(decode_ge(&bytes[..cut], registry()), Err(CodecError::UnexpectedEof)),
                "cut at {cut}"
            );
        }
        let mut long = bytes.clone();
        long.extend_from_slice(&[0, 0]);
        assert!(matches!(
            decode_ge(&long, registry()),
            Err(CodecError::TrailingBytes(2))
        ));
    }

    #[test]
    fn deeply_nested_stream_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&GE_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        for _ in 0..200_000 {
            bytes.extend_from_slice(&tag::SEQ.to_be_bytes());
            bytes.extend_from_slice(&1u16.to_be_bytes());
            bytes.push(b'G');
            bytes.extend_from_slice(&1u32.to_be_bytes());
        }
        bytes.extend_from_slice(&encode_ge(&GE::constant(1.0)).unwrap()[6..]);

        assert!(matches!(
            decode_ge(&bytes, registry()),
            Err(CodecError::DepthExceeded {
                limit: MAX_EXPAND_DEPTH
            })
        ));
    }

    #[test]
    fn nesting_at_the_limit_round_trips() {
        let mut tree = GE::constant(1.0);
        for _ in 0..MAX_EXPAND_DEPTH - 1 {
            tree = GE::seq([tree]);
        }
        let bytes = encode_ge(&tree).unwrap();
        assert_eq!(decode_ge(&bytes, registry()).unwrap(), tree);

        let deeper = GE::seq([tree]);
        assert!(matches!(
            encode_ge(&deeper),
            Err(CodecError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn unknown_tag_and_field_kind() {
        let mut bytes = encode_ge(&GE::constant(1.0)).unwrap();
        bytes[6..8].copy_from_slice(&999u16.to_be_bytes());
        assert!(matches!(
            decode_ge(&bytes, registry()),
            Err(CodecError::UnknownType(999))
        ));

        let mut bytes = encode_ge(&GE::constant(1.0)).unwrap();
        bytes[10] = b'i';
        assert!(matches!(
            decode_ge(&bytes, registry()),
            Err(CodecError::FieldKind {
                expected: 'f',
                found: 'i'
            })
        ));

        let empty = CodecRegistry::builtin();
        let bytes = encode_ge(&call("Saw").ar().build().unwrap()).unwrap();
        assert!(matches!(decode_ge(&bytes, &empty), Err(CodecError::UnknownType(17))));
    }

    #[test]
    fn malformed_references_rejected() {
        // Back-reference before any node record.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"UGGE");
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&tag::BACKREF.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.push(b'i');
        bytes.extend_from_slice(&0i32.to_be_bytes());
        assert!(matches!(decode_ge(&bytes, registry()), Err(CodecError::Malformed(_))));

        // Graph node reading itself.
        let sig = call("Saw").ar().build().unwrap();
        let graph = build(&[sig], &BuildOptions::default()).unwrap();
        let mut looped = graph.clone();
        looped.ugens[0].inputs = vec![Input::Node {
            node: NodeId(0),
            output: 0,
        }];
        let bytes = encode_graph(&looped).unwrap();
        assert!(matches!(decode_graph(&bytes, registry()), Err(CodecError::Malformed(_))));

        let mut out_of_range = graph;
        out_of_range.ugens[0].inputs = vec![Input::Constant { index: 7 }];
        let bytes = encode_graph(&out_of_range).unwrap();
        assert!(matches!(decode_graph(&bytes, registry()), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn registry_arities() {
        let r = registry();
        assert_eq!(r.arity(tag::CONSTANT), Some(1));
        assert_eq!(r.arity(tag::CONTROL), Some(3));
        assert_eq!(r.arity(16), Some(4));
        assert_eq!(r.spec(16).map(|s| s.name.as_str()), Some("SinOsc"));
        assert!(r.spec(tag::SEQ).is_none());
        assert_eq!(r.arity(999), None);
    }

    #[test]
    fn registry_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CodecRegistry>();
    }
}
