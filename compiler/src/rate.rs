// rate.rs — Execution rates, the coercion order, and per-edge rate checks
//
// Scalar ⊑ Control ⊑ Audio form a chain; Demand sits outside it and never
// coerces implicitly. The builder asks `check_edge` once per node input and
// either passes the atom through, wraps it in an adapter, or fails.
//
// Preconditions: none.
// Postconditions: none (pure functions over small enums).
// Failure modes: `RateConflict` when an edge crosses the demand boundary.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Rate ────────────────────────────────────────────────────────────────────

/// Execution rate of a UGen or control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rate {
    Scalar,
    Control,
    Audio,
    Demand,
}

impl Rate {
    pub const ALL: [Rate; 4] = [Rate::Scalar, Rate::Control, Rate::Audio, Rate::Demand];

    /// Wire identifier (matches the synthesis engine's rate numbering).
    pub fn id(self) -> u8 {
        match self {
            Rate::Scalar => 0,
            Rate::Control => 1,
            Rate::Audio => 2,
            Rate::Demand => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Rate> {
        Rate::ALL.into_iter().find(|r| r.id() == id)
    }

    /// Method-style suffix used in graph descriptions (`SinOsc.ar`).
    pub fn suffix(self) -> &'static str {
        match self {
            Rate::Scalar => "ir",
            Rate::Control => "kr",
            Rate::Audio => "ar",
            Rate::Demand => "dr",
        }
    }

    pub fn from_suffix(s: &str) -> Option<Rate> {
        Rate::ALL.into_iter().find(|r| r.suffix() == s)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rate::Scalar => "scalar",
            Rate::Control => "control",
            Rate::Audio => "audio",
            Rate::Demand => "demand",
        };
        write!(f, "{}", name)
    }
}

// ── Coercion order ──────────────────────────────────────────────────────────

/// Position in the Scalar → Control → Audio chain. Demand has none.
fn coercion_rank(r: Rate) -> Option<u8> {
    match r {
        Rate::Scalar => Some(0),
        Rate::Control => Some(1),
        Rate::Audio => Some(2),
        Rate::Demand => None,
    }
}

/// Check if a signal running at `from` may feed an input expecting `to`
/// without crossing the demand boundary.
pub fn can_coerce(from: Rate, to: Rate) -> bool {
    if from == to {
        return true;
    }
    match (coercion_rank(from), coercion_rank(to)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

/// `from` sits strictly below `to` in the coercion chain.
pub fn is_below(from: Rate, to: Rate) -> bool {
    from != to && can_coerce(from, to)
}

/// Least upper bound used by `RateFrom::Max`. Any demand operand wins.
pub fn max_rate(a: Rate, b: Rate) -> Rate {
    match (coercion_rank(a), coercion_rank(b)) {
        (Some(ra), Some(rb)) => {
            if ra >= rb {
                a
            } else {
                b
            }
        }
        _ => Rate::Demand,
    }
}

// ── Declared rates ──────────────────────────────────────────────────────────

/// A node's declared rate: fixed by the caller, or inferred from its inputs
/// when the node is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaybeRate {
    Fixed(Rate),
    Infer,
}

impl MaybeRate {
    const INFER_ID: u8 = 0xff;

    pub fn id(self) -> u8 {
        match self {
            MaybeRate::Fixed(r) => r.id(),
            MaybeRate::Infer => Self::INFER_ID,
        }
    }

    pub fn from_id(id: u8) -> Option<MaybeRate> {
        if id == Self::INFER_ID {
            Some(MaybeRate::Infer)
        } else {
            Rate::from_id(id).map(MaybeRate::Fixed)
        }
    }
}

/// Which inputs govern an inferred rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateFrom {
    /// The first input atom.
    #[default]
    First,
    /// The first atom of the given argument.
    Arg(usize),
    /// The highest rate among all input atoms.
    Max,
}

/// Rate requirement a descriptor places on one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRate {
    /// Accepts any rate; demand only into demand-rate nodes.
    #[default]
    Any,
    /// Must run at least at the consuming node's rate.
    Node,
    /// Must run at least at the given rate.
    Fixed(Rate),
}

// ── Edge check ──────────────────────────────────────────────────────────────

/// An edge that cannot be made legal by implicit coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConflict {
    pub from: Rate,
    pub to: Rate,
}

/// Decide what to do with one input edge.
///
/// Returns `Ok(None)` when the producer can be used as is, `Ok(Some(rate))`
/// when exactly one adapter to `rate` must be inserted on the edge.
pub fn check_edge(
    producer: Rate,
    node_rate: Rate,
    requirement: InputRate,
) -> Result<Option<Rate>, RateConflict> {
    let required = match requirement {
        InputRate::Any => {
            if producer == Rate::Demand && node_rate != Rate::Demand {
                return Err(RateConflict {
                    from: producer,
                    to: node_rate,
                });
            }
            return Ok(None);
        }
        InputRate::Node => node_rate,
        InputRate::Fixed(r) => r,
    };

    if producer == required {
        Ok(None)
    } else if is_below(producer, required) {
        Ok(Some(required))
    } else if can_coerce(required, producer) {
        // Faster producer into a slower input: the engine samples it.
        Ok(None)
    } else {
        Err(RateConflict {
            from: producer,
            to: required,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
