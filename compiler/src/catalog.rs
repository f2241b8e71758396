// catalog.rs — UGen descriptor catalog
//
// Holds the descriptors the engine consumes: name, wire tag, supported
// rates, argument list, output arity and capability flags. Descriptors come
// from the built-in standard table or from JSON manifests. Construction of a
// primitive is one generic function driven by descriptor data; there is no
// per-primitive code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ge::{Arg, Flags, NodeSpec, GE};
use crate::rate::{InputRate, MaybeRate, Rate, RateFrom};

// ── Data types ──────────────────────────────────────────────────────────────

/// Lowest tag a catalog primitive may use. Tags below are reserved for the
/// codec's built-in records and the rate adapters.
pub const FIRST_CATALOG_TAG: u16 = 16;

/// Most outputs a single primitive may declare.
pub const MAX_OUTPUTS: u32 = 1024;

/// Largest integer magnitude an f32 holds exactly.
const F32_EXACT_INT: i32 = 1 << 24;

/// Tag of the control → audio adapter.
pub const K2A_TAG: u16 = 8;
/// Tag of the scalar → control adapter.
pub const DC_TAG: u16 = 9;

/// How an argument is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// A signal input. `vector` inputs take every channel of their argument
    /// as consecutive inputs instead of triggering multichannel expansion.
    Input {
        #[serde(default)]
        rate: InputRate,
        #[serde(default)]
        vector: bool,
    },
    /// A construction-time integer (e.g. a channel count). Not an input.
    Int,
}

impl Default for ArgKind {
    fn default() -> Self {
        ArgKind::Input {
            rate: InputRate::Any,
            vector: false,
        }
    }
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ArgKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f32>,
}

impl ArgSpec {
    /// Whether a multichannel value in this slot replicates the node.
    pub fn expands(&self) -> bool {
        matches!(self.kind, ArgKind::Input { vector: false, .. })
    }

    pub fn input_rate(&self) -> Option<InputRate> {
        match self.kind {
            ArgKind::Input { rate, .. } => Some(rate),
            ArgKind::Int => None,
        }
    }
}

/// Output arity of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outputs {
    Fixed(u32),
    /// Taken from the integer argument at this index.
    FromArg(usize),
}

fn one_output() -> Outputs {
    Outputs::Fixed(1)
}

/// Descriptor of one catalog primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UGenSpec {
    pub name: String,
    pub tag: u16,
    /// Supported explicit rates, default first. Empty means the rate is
    /// always inferred from the inputs.
    #[serde(default)]
    pub rates: Vec<Rate>,
    #[serde(default)]
    pub rate_from: RateFrom,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    #[serde(default = "one_output")]
    pub outputs: Outputs,
    #[serde(default)]
    pub flags: Flags,
}

/// Errors raised while loading descriptors or constructing primitives.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: invalid manifest: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown ugen '{0}'")]
    UnknownUGen(String),
    #[error("duplicate ugen '{0}'")]
    DuplicateUGen(String),
    #[error("tag {tag} of '{name}' is already used by '{existing}'")]
    DuplicateTag {
        tag: u16,
        name: String,
        existing: String,
    },
    #[error("tag {tag} of '{name}' is reserved (catalog tags start at {FIRST_CATALOG_TAG})")]
    ReservedTag { tag: u16, name: String },
    #[error("'{name}' is not valid: {message}")]
    InvalidSpec { name: String, message: String },
    #[error("'{ugen}' does not run at {rate} rate")]
    UnsupportedRate { ugen: String, rate: Rate },
    #[error("'{ugen}' takes {expected} arguments, got {found}")]
    ArgCount {
        ugen: String,
        expected: usize,
        found: usize,
    },
    #[error("'{ugen}' has no argument '{arg}'")]
    UnknownArg { ugen: String, arg: String },
    #[error("argument '{arg}' of '{ugen}' given twice")]
    DuplicateArg { ugen: String, arg: String },
    #[error("missing argument '{arg}' of '{ugen}'")]
    MissingArg { ugen: String, arg: String },
    #[error("argument '{arg}' of '{ugen}' {message}")]
    ArgKind {
        ugen: String,
        arg: String,
        message: String,
    },
}

// ── Descriptor behavior ─────────────────────────────────────────────────────

impl UGenSpec {
    pub fn arg_index(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|a| a.name == name)
    }

    pub fn supports(&self, rate: Rate) -> bool {
        self.rates.contains(&rate)
    }

    /// Rate used when the caller names none: the first listed rate, or
    /// inference for rate-polymorphic primitives.
    pub fn default_rate(&self) -> MaybeRate {
        match self.rates.first() {
            Some(r) => MaybeRate::Fixed(*r),
            None => MaybeRate::Infer,
        }
    }

    /// Check the descriptor's internal consistency.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |message: String| CatalogError::InvalidSpec {
            name: self.name.clone(),
            message,
        };

        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid(format!("invalid ugen name '{}'", self.name)));
        }
        for (i, arg) in self.args.iter().enumerate() {
            if self.args[..i].iter().any(|a| a.name == arg.name) {
                return Err(invalid(format!("argument '{}' declared twice", arg.name)));
            }
            if let (ArgKind::Int, Some(d)) = (arg.kind, arg.default) {
                if d.fract() != 0.0 {
                    return Err(invalid(format!(
                        "integer argument '{}' has non-integer default {}",
                        arg.name, d
                    )));
                }
            }
        }
        if let Outputs::Fixed(n) = self.outputs {
            if n > MAX_OUTPUTS {
                return Err(invalid(format!("{} outputs, at most {} allowed", n, MAX_OUTPUTS)));
            }
        }
        if let Outputs::FromArg(i) = self.outputs {
            match self.args.get(i) {
                Some(ArgSpec {
                    kind: ArgKind::Int, ..
                }) => {}
                _ => {
                    return Err(invalid(format!(
                        "output count refers to argument {} which is not an integer argument",
                        i
                    )))
                }
            }
        }
        if let RateFrom::Arg(i) = self.rate_from {
            if self.args.get(i).and_then(ArgSpec::input_rate).is_none() {
                return Err(invalid(format!(
                    "rate is inferred from argument {} which is not an input",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Build a node from exactly one value per argument.
    ///
    /// Argument kinds must match the descriptor exactly; `Call` is the
    /// lenient front door that fills defaults and converts literals.
    pub fn instantiate(
        self: &Arc<Self>,
        rate: MaybeRate,
        args: Vec<Arg>,
        flags: Flags,
    ) -> Result<NodeSpec, CatalogError> {
        match rate {
            MaybeRate::Fixed(r) if !self.supports(r) => {
                return Err(CatalogError::UnsupportedRate {
                    ugen: self.name.clone(),
                    rate: r,
                })
            }
            MaybeRate::Infer if !self.rates.is_empty() => {
                return Err(CatalogError::InvalidSpec {
                    name: self.name.clone(),
                    message: "rate must be given explicitly".to_string(),
                })
            }
            _ => {}
        }
        if args.len() != self.args.len() {
            return Err(CatalogError::ArgCount {
                ugen: self.name.clone(),
                expected: self.args.len(),
                found: args.len(),
            });
        }
        for (arg, spec) in args.iter().zip(&self.args) {
            let ok = matches!(
                (arg, spec.kind),
                (Arg::Ge(_), ArgKind::Input { .. }) | (Arg::Int(_), ArgKind::Int)
            );
            if !ok {
                return Err(CatalogError::ArgKind {
                    ugen: self.name.clone(),
                    arg: spec.name.clone(),
                    message: match spec.kind {
                        ArgKind::Int => "must be an integer".to_string(),
                        ArgKind::Input { .. } => "must be a signal".to_string(),
                    },
                });
            }
        }

        let outputs = match self.outputs {
            Outputs::Fixed(n) => n,
            Outputs::FromArg(i) => match args.get(i) {
                Some(Arg::Int(n)) if *n >= 0 && (*n as u32) <= MAX_OUTPUTS => *n as u32,
                _ => {
                    return Err(CatalogError::ArgKind {
                        ugen: self.name.clone(),
                        arg: self.args[i].name.clone(),
                        message: format!("must be a channel count between 0 and {}", MAX_OUTPUTS),
                    })
                }
            },
        };

        Ok(NodeSpec {
            spec: Arc::clone(self),
            rate,
            args,
            flags,
            outputs,
        })
    }
}

// ── Call builder ────────────────────────────────────────────────────────────

/// Fluent construction of one primitive: rate, positional and named
/// arguments, defaults filled from the descriptor.
#[derive(Debug, Clone)]
pub struct Call {
    spec: Arc<UGenSpec>,
    rate: Option<Rate>,
    positional: Vec<Arg>,
    named: Vec<(String, Arg)>,
}

impl Call {
    pub fn new(spec: Arc<UGenSpec>) -> Self {
        Call {
            spec,
            rate: None,
            positional: Vec::new(),
            named: Vec::new(),
        }
    }

    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn ir(self) -> Self {
        self.rate(Rate::Scalar)
    }

    pub fn kr(self) -> Self {
        self.rate(Rate::Control)
    }

    pub fn ar(self) -> Self {
        self.rate(Rate::Audio)
    }

    pub fn dr(self) -> Self {
        self.rate(Rate::Demand)
    }

    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<GE, CatalogError> {
        let spec = self.spec;
        let ugen = || spec.name.clone();

        if self.positional.len() > spec.args.len() {
            return Err(CatalogError::ArgCount {
                ugen: ugen(),
                expected: spec.args.len(),
                found: self.positional.len(),
            });
        }

        let mut slots: Vec<Option<Arg>> = vec![None; spec.args.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (name, value) in self.named {
            let i = spec.arg_index(&name).ok_or_else(|| CatalogError::UnknownArg {
                ugen: ugen(),
                arg: name.clone(),
            })?;
            if slots[i].is_some() {
                return Err(CatalogError::DuplicateArg {
                    ugen: ugen(),
                    arg: name,
                });
            }
            slots[i] = Some(value);
        }

        let mut args = Vec::with_capacity(slots.len());
        for (slot, arg_spec) in slots.into_iter().zip(&spec.args) {
            let value = match (slot, arg_spec.default) {
                (Some(v), _) => v,
                (None, Some(d)) => Arg::Ge(GE::Constant(d)),
                (None, None) => {
                    return Err(CatalogError::MissingArg {
                        ugen: ugen(),
                        arg: arg_spec.name.clone(),
                    })
                }
            };
            args.push(coerce_arg(&spec, arg_spec, value)?);
        }

        let rate = match self.rate {
            Some(r) => MaybeRate::Fixed(r),
            None => spec.default_rate(),
        };
        let flags = spec.flags;
        let node = spec.instantiate(rate, args, flags)?;
        Ok(GE::Node(Arc::new(node)))
    }
}

/// Integral constants become integer attributes and integers become
/// constant signals, whichever the slot asks for.
fn coerce_arg(spec: &UGenSpec, arg_spec: &ArgSpec, value: Arg) -> Result<Arg, CatalogError> {
    let kind_error = |message: &str| CatalogError::ArgKind {
        ugen: spec.name.clone(),
        arg: arg_spec.name.clone(),
        message: message.to_string(),
    };
    match (arg_spec.kind, value) {
        // The upper bound is exclusive: 2^31 itself is representable as f32.
        (ArgKind::Int, Arg::Ge(GE::Constant(v)))
            if v.fract() == 0.0 && v >= i32::MIN as f32 && v < 2_147_483_648.0 =>
        {
            Ok(Arg::Int(v as i32))
        }
        (ArgKind::Int, Arg::Ge(GE::Constant(v))) if v.fract() == 0.0 => {
            Err(kind_error("integer literal out of range"))
        }
        (ArgKind::Int, Arg::Ge(_)) => Err(kind_error("must be an integer literal")),
        (ArgKind::Input { .. }, Arg::Int(n)) if (-F32_EXACT_INT..=F32_EXACT_INT).contains(&n) => {
            Ok(Arg::Ge(GE::Constant(n as f32)))
        }
        (ArgKind::Input { .. }, Arg::Int(_)) => {
            Err(kind_error("integer too large to pass exactly as a signal"))
        }
        (_, value) => Ok(value),
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Manifest {
    ugens: Vec<UGenSpec>,
}

/// Descriptor catalog, keyed by name and by wire tag.
#[derive(Debug, Clone)]
pub struct Catalog {
    by_name: BTreeMap<String, Arc<UGenSpec>>,
    by_tag: BTreeMap<u16, Arc<UGenSpec>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

static STANDARD: Lazy<Catalog> = Lazy::new(|| {
    let mut catalog = Catalog::new();
    for spec in standard_specs() {
        if let Err(e) = catalog.insert(spec) {
            // The table is static; a failure here is a bug in it.
            panic!("standard catalog: {}", e);
        }
    }
    catalog
});

impl Catalog {
    /// A catalog holding only the rate adapters.
    pub fn new() -> Self {
        let mut catalog = Catalog {
            by_name: BTreeMap::new(),
            by_tag: BTreeMap::new(),
        };
        for spec in [Arc::clone(&K2A), Arc::clone(&DC)] {
            catalog.by_tag.insert(spec.tag, Arc::clone(&spec));
            catalog.by_name.insert(spec.name.clone(), spec);
        }
        catalog
    }

    /// The built-in standard catalog.
    pub fn standard() -> &'static Catalog {
        &STANDARD
    }

    /// Add one descriptor after validating it.
    pub fn insert(&mut self, spec: UGenSpec) -> Result<(), CatalogError> {
        spec.validate()?;
        if spec.tag < FIRST_CATALOG_TAG {
            return Err(CatalogError::ReservedTag {
                tag: spec.tag,
                name: spec.name,
            });
        }
        if self.by_name.contains_key(&spec.name) {
            return Err(CatalogError::DuplicateUGen(spec.name));
        }
        if let Some(existing) = self.by_tag.get(&spec.tag) {
            return Err(CatalogError::DuplicateTag {
                tag: spec.tag,
                name: spec.name,
                existing: existing.name.clone(),
            });
        }
        let spec = Arc::new(spec);
        self.by_tag.insert(spec.tag, Arc::clone(&spec));
        self.by_name.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Load descriptors from a JSON manifest (`{"ugens": [...]}`). Returns
    /// the number of descriptors added.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_json(&text, path)
    }

    /// Load descriptors from manifest text; `origin` names it in errors.
    pub fn load_json(&mut self, text: &str, origin: &Path) -> Result<usize, CatalogError> {
        let manifest: Manifest = serde_json::from_str(text).map_err(|e| CatalogError::Json {
            path: origin.to_path_buf(),
            source: e,
        })?;
        let count = manifest.ugens.len();
        for spec in manifest.ugens {
            self.insert(spec)?;
        }
        Ok(count)
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<UGenSpec>> {
        self.by_name.get(name)
    }

    pub fn lookup_tag(&self, tag: u16) -> Option<&Arc<UGenSpec>> {
        self.by_tag.get(&tag)
    }

    /// Start building a call to the named primitive.
    pub fn call(&self, name: &str) -> Result<Call, CatalogError> {
        self.lookup(name)
            .map(|spec| Call::new(Arc::clone(spec)))
            .ok_or_else(|| CatalogError::UnknownUGen(name.to_string()))
    }

    /// All descriptors, ordered by name.
    pub fn ugens(&self) -> impl Iterator<Item = &Arc<UGenSpec>> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Compact JSON of every descriptor in name order. Stable across runs
    /// and load order; used for provenance fingerprints.
    pub fn canonical_json(&self) -> String {
        let specs: Vec<&UGenSpec> = self.by_name.values().map(|s| s.as_ref()).collect();
        serde_json::to_string(&specs).unwrap_or_default()
    }
}

// ── Rate adapters ───────────────────────────────────────────────────────────

static K2A: Lazy<Arc<UGenSpec>> = Lazy::new(|| {
    Arc::new(UGenSpec {
        name: "K2A".to_string(),
        tag: K2A_TAG,
        rates: vec![Rate::Audio],
        rate_from: RateFrom::First,
        args: vec![input("in", None)],
        outputs: Outputs::Fixed(1),
        flags: Flags::NONE,
    })
});

static DC: Lazy<Arc<UGenSpec>> = Lazy::new(|| {
    Arc::new(UGenSpec {
        name: "DC".to_string(),
        tag: DC_TAG,
        rates: vec![Rate::Control],
        rate_from: RateFrom::First,
        args: vec![input("in", None)],
        outputs: Outputs::Fixed(1),
        flags: Flags::NONE,
    })
});

/// The adapter that lifts a slower signal to `target`, if one exists.
pub fn adapter(target: Rate) -> Option<&'static Arc<UGenSpec>> {
    match target {
        Rate::Audio => Some(&K2A),
        Rate::Control => Some(&DC),
        Rate::Scalar | Rate::Demand => None,
    }
}

// ── Standard table ──────────────────────────────────────────────────────────

fn input(name: &str, default: Option<f32>) -> ArgSpec {
    ArgSpec {
        name: name.to_string(),
        kind: ArgKind::Input {
            rate: InputRate::Any,
            vector: false,
        },
        default,
    }
}

fn rated(name: &str, rate: InputRate, default: Option<f32>) -> ArgSpec {
    ArgSpec {
        name: name.to_string(),
        kind: ArgKind::Input {
            rate,
            vector: false,
        },
        default,
    }
}

fn vector(name: &str, rate: InputRate) -> ArgSpec {
    ArgSpec {
        name: name.to_string(),
        kind: ArgKind::Input { rate, vector: true },
        default: None,
    }
}

fn int(name: &str, default: i32) -> ArgSpec {
    ArgSpec {
        name: name.to_string(),
        kind: ArgKind::Int,
        default: Some(default as f32),
    }
}

fn ugen(name: &str, tag: u16, rates: &[Rate], args: Vec<ArgSpec>) -> UGenSpec {
    UGenSpec {
        name: name.to_string(),
        tag,
        rates: rates.to_vec(),
        rate_from: RateFrom::First,
        args,
        outputs: Outputs::Fixed(1),
        flags: Flags::NONE,
    }
}

const AR_KR: &[Rate] = &[Rate::Audio, Rate::Control];
const KR_AR: &[Rate] = &[Rate::Control, Rate::Audio];

fn standard_specs() -> Vec<UGenSpec> {
    use Rate::*;

    let done = Flags::SIDE_EFFECT | Flags::DONE_FLAG;
    let noise = Flags::INDIVIDUAL;

    vec![
        // Oscillators
        ugen("SinOsc", 16, AR_KR, vec![input("freq", Some(440.0)), input("phase", Some(0.0))]),
        ugen("Saw", 17, AR_KR, vec![input("freq", Some(440.0))]),
        ugen(
            "Pulse",
            18,
            AR_KR,
            vec![input("freq", Some(440.0)), input("width", Some(0.5))],
        ),
        ugen("Impulse", 19, AR_KR, vec![input("freq", Some(440.0)), input("phase", Some(0.0))]),
        // Noise
        UGenSpec {
            flags: noise,
            ..ugen("WhiteNoise", 20, AR_KR, vec![])
        },
        UGenSpec {
            flags: noise,
            ..ugen("PinkNoise", 21, AR_KR, vec![])
        },
        UGenSpec {
            flags: noise,
            ..ugen("Dust", 22, AR_KR, vec![input("density", Some(0.0))])
        },
        UGenSpec {
            flags: noise,
            ..ugen("LFNoise1", 23, AR_KR, vec![input("freq", Some(500.0))])
        },
        UGenSpec {
            flags: noise,
            ..ugen("Rand", 24, &[Scalar], vec![input("lo", Some(0.0)), input("hi", Some(1.0))])
        },
        // Envelopes
        UGenSpec {
            flags: done,
            ..ugen(
                "Line",
                25,
                KR_AR,
                vec![
                    input("start", Some(0.0)),
                    input("end", Some(1.0)),
                    input("dur", Some(1.0)),
                    input("doneAction", Some(0.0)),
                ],
            )
        },
        UGenSpec {
            flags: done,
            ..ugen(
                "EnvGen",
                26,
                KR_AR,
                vec![
                    input("gate", Some(1.0)),
                    input("levelScale", Some(1.0)),
                    input("levelBias", Some(0.0)),
                    input("timeScale", Some(1.0)),
                    input("doneAction", Some(0.0)),
                    vector("envelope", InputRate::Any),
                ],
            )
        },
        // Filters
        ugen(
            "Decay",
            27,
            AR_KR,
            vec![rated("in", InputRate::Node, Some(0.0)), input("time", Some(1.0))],
        ),
        ugen(
            "Decay2",
            28,
            AR_KR,
            vec![
                rated("in", InputRate::Node, Some(0.0)),
                input("attack", Some(0.01)),
                input("release", Some(1.0)),
            ],
        ),
        ugen(
            "LPF",
            29,
            AR_KR,
            vec![rated("in", InputRate::Node, Some(0.0)), input("freq", Some(440.0))],
        ),
        ugen(
            "HPF",
            30,
            AR_KR,
            vec![rated("in", InputRate::Node, Some(0.0)), input("freq", Some(440.0))],
        ),
        ugen(
            "Lag",
            31,
            AR_KR,
            vec![rated("in", InputRate::Node, Some(0.0)), input("time", Some(0.1))],
        ),
        ugen(
            "LeakDC",
            32,
            AR_KR,
            vec![rated("in", InputRate::Node, Some(0.0)), input("coef", Some(0.995))],
        ),
        // Arithmetic
        UGenSpec {
            rate_from: RateFrom::Max,
            ..ugen(
                "MulAdd",
                33,
                &[],
                vec![
                    input("in", None),
                    input("mul", Some(1.0)),
                    input("add", Some(0.0)),
                ],
            )
        },
        // Panning
        UGenSpec {
            outputs: Outputs::Fixed(2),
            ..ugen(
                "Pan2",
                34,
                AR_KR,
                vec![
                    rated("in", InputRate::Node, None),
                    input("pos", Some(0.0)),
                    input("level", Some(1.0)),
                ],
            )
        },
        UGenSpec {
            rate_from: RateFrom::Arg(1),
            ..ugen(
                "Select",
                35,
                &[],
                vec![input("which", None), vector("array", InputRate::Any)],
            )
        },
        // Buses
        UGenSpec {
            outputs: Outputs::FromArg(1),
            ..ugen("In", 36, AR_KR, vec![input("bus", Some(0.0)), int("numChannels", 1)])
        },
        UGenSpec {
            outputs: Outputs::Fixed(0),
            flags: Flags::SIDE_EFFECT,
            ..ugen(
                "Out",
                37,
                AR_KR,
                vec![input("bus", Some(0.0)), vector("channelsArray", InputRate::Node)],
            )
        },
        UGenSpec {
            outputs: Outputs::Fixed(0),
            flags: Flags::SIDE_EFFECT,
            ..ugen(
                "ReplaceOut",
                38,
                AR_KR,
                vec![input("bus", Some(0.0)), vector("channelsArray", InputRate::Node)],
            )
        },
        UGenSpec {
            outputs: Outputs::FromArg(0),
            ..ugen("LocalIn", 39, AR_KR, vec![int("numChannels", 1)])
        },
        UGenSpec {
            outputs: Outputs::Fixed(0),
            flags: Flags::SIDE_EFFECT,
            ..ugen(
                "LocalOut",
                40,
                AR_KR,
                vec![vector("channelsArray", InputRate::Node)],
            )
        },
        // Buffers
        UGenSpec {
            outputs: Outputs::FromArg(0),
            flags: done,
            ..ugen(
                "PlayBuf",
                41,
                AR_KR,
                vec![
                    int("numChannels", 1),
                    input("bufnum", Some(0.0)),
                    input("rate", Some(1.0)),
                    input("trigger", Some(1.0)),
                    input("startPos", Some(0.0)),
                    input("loop", Some(0.0)),
                    input("doneAction", Some(0.0)),
                ],
            )
        },
        UGenSpec {
            outputs: Outputs::FromArg(0),
            ..ugen(
                "BufRd",
                42,
                AR_KR,
                vec![
                    int("numChannels", 1),
                    input("bufnum", Some(0.0)),
                    rated("phase", InputRate::Node, Some(0.0)),
                    input("loop", Some(1.0)),
                    input("interpolation", Some(2.0)),
                ],
            )
        },
        // Demand rate
        ugen(
            "Demand",
            43,
            AR_KR,
            vec![
                input("trig", None),
                input("reset", Some(0.0)),
                rated("demandUGens", InputRate::Fixed(Demand), None),
            ],
        ),
        UGenSpec {
            flags: done,
            ..ugen(
                "Duty",
                44,
                AR_KR,
                vec![
                    rated("dur", InputRate::Fixed(Demand), Some(1.0)),
                    input("reset", Some(0.0)),
                    rated("level", InputRate::Fixed(Demand), Some(1.0)),
                    input("doneAction", Some(0.0)),
                ],
            )
        },
        ugen(
            "Dseq",
            45,
            &[Demand],
            vec![input("repeats", Some(1.0)), vector("list", InputRate::Any)],
        ),
        ugen(
            "Dseries",
            46,
            &[Demand],
            vec![
                input("length", Some(100.0)),
                input("start", Some(0.0)),
                input("step", Some(1.0)),
            ],
        ),
        UGenSpec {
            flags: noise,
            ..ugen(
                "Dwhite",
                47,
                &[Demand],
                vec![
                    input("length", Some(100.0)),
                    input("lo", Some(0.0)),
                    input("hi", Some(1.0)),
                ],
            )
        },
        // Side effects without outputs
        UGenSpec {
            outputs: Outputs::Fixed(0),
            flags: Flags::SIDE_EFFECT,
            ..ugen("FreeSelf", 48, &[Control], vec![input("in", None)])
        },
        UGenSpec {
            outputs: Outputs::Fixed(0),
            flags: Flags::SIDE_EFFECT,
            ..ugen(
                "SendTrig",
                49,
                KR_AR,
                vec![input("in", Some(0.0)), input("id", Some(0.0)), input("value", Some(0.0))],
            )
        },
        UGenSpec {
            flags: Flags::SIDE_EFFECT,
            ..ugen(
                "Poll",
                50,
                KR_AR,
                vec![input("trig", None), input("in", None), input("trigid", Some(-1.0))],
            )
        },
        ugen("A2K", 51, &[Control], vec![input("in", None)]),
    ]
}

// ── Tests ───────────────────────────────────────────────────────────────────
