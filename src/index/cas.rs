//! Content-and-structure index keys and filters.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use crate::primitives::bytes::buf::{self, Cursor};
use crate::types::{PalimpsestError, Pcr, Result};

use super::avl::{KeyCodec, SearchMode};
use super::path::PathFilter;

/// Type values are parsed as before indexing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ContentType {
    Str = 0,
    Int = 1,
    Dbl = 2,
    Bool = 3,
}

impl ContentType {
    /// Parses raw value bytes; `None` when they do not form a value of this type.
    pub fn parse(self, raw: &[u8]) -> Option<Atomic> {
        let text = std::str::from_utf8(raw).ok()?;
        match self {
            ContentType::Str => Some(Atomic::Str(text.to_owned())),
            ContentType::Int => text.trim().parse().ok().map(Atomic::Int),
            ContentType::Dbl => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .map(|v| Atomic::Dbl(unsigned_zero(v))),
            ContentType::Bool => match text.trim() {
                "true" | "1" => Some(Atomic::Bool(true)),
                "false" | "0" => Some(Atomic::Bool(false)),
                _ => None,
            },
        }
    }
}

/// Folds `-0.0` into `0.0` so both zeros share one index key.
fn unsigned_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

impl TryFrom<u8> for ContentType {
    type Error = PalimpsestError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ContentType::Str),
            1 => Ok(ContentType::Int),
            2 => Ok(ContentType::Dbl),
            3 => Ok(ContentType::Bool),
            other => Err(PalimpsestError::Consistency(format!(
                "unknown content type {other}"
            ))),
        }
    }
}

/// Typed atomic value.
///
/// Values of different types order by type first; doubles use IEEE total
/// order with both zeros equal.
#[derive(Clone, Debug)]
pub enum Atomic {
    Str(String),
    Int(i64),
    Dbl(f64),
    Bool(bool),
}

impl Atomic {
    fn rank(&self) -> u8 {
        match self {
            Atomic::Str(_) => 0,
            Atomic::Int(_) => 1,
            Atomic::Dbl(_) => 2,
            Atomic::Bool(_) => 3,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.rank());
        match self {
            Atomic::Str(v) => buf::put_str(out, v),
            Atomic::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Atomic::Dbl(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Atomic::Bool(v) => buf::put_bool(out, *v),
        }
    }

    fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(match cur.u8()? {
            0 => Atomic::Str(cur.string()?),
            1 => Atomic::Int(cur.u64_be()? as i64),
            2 => Atomic::Dbl(f64::from_bits(cur.u64_be()?)),
            3 => Atomic::Bool(cur.bool()?),
            other => {
                return Err(PalimpsestError::Consistency(format!(
                    "unknown atomic tag {other}"
                )))
            }
        })
    }
}

impl Ord for Atomic {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Atomic::Str(a), Atomic::Str(b)) => a.cmp(b),
            (Atomic::Int(a), Atomic::Int(b)) => a.cmp(b),
            (Atomic::Dbl(a), Atomic::Dbl(b)) => unsigned_zero(*a).total_cmp(&unsigned_zero(*b)),
            (Atomic::Bool(a), Atomic::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Atomic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Atomic {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Atomic {}

impl fmt::Display for Atomic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atomic::Str(v) => f.write_str(v),
            Atomic::Int(v) => write!(f, "{v}"),
            Atomic::Dbl(v) => write!(f, "{v}"),
            Atomic::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Key of the CAS index: the typed value, then the path class it occurs on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CasValue {
    pub value: Atomic,
    pub pcr: Pcr,
}

impl CasValue {
    pub fn new(value: Atomic, pcr: Pcr) -> Self {
        Self { value, pcr }
    }
}

impl KeyCodec for CasValue {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        key.value.encode(out);
        out.extend_from_slice(&key.pcr.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let value = Atomic::decode(&mut cur)?;
        let pcr = cur.u64_be()?;
        cur.finish()?;
        Ok(Self { value, pcr })
    }
}

/// Range predicate over CAS values restricted to a set of paths.
#[derive(Clone, Debug)]
pub struct CasFilterRange {
    pub min: Atomic,
    pub max: Atomic,
    pub inc_min: bool,
    pub inc_max: bool,
    pub paths: PathFilter,
}

impl CasFilterRange {
    pub fn new(min: Atomic, max: Atomic, inc_min: bool, inc_max: bool, paths: PathFilter) -> Self {
        Self {
            min,
            max,
            inc_min,
            inc_max,
            paths,
        }
    }

    /// Whether `value` lies between the bounds.
    pub fn in_range(&self, value: &Atomic) -> bool {
        let above = match value.cmp(&self.min) {
            Ordering::Greater => true,
            Ordering::Equal => self.inc_min,
            Ordering::Less => false,
        };
        let below = match value.cmp(&self.max) {
            Ordering::Less => true,
            Ordering::Equal => self.inc_max,
            Ordering::Greater => false,
        };
        above && below
    }

    pub(crate) fn bounds(&self) -> (Bound<Atomic>, Bound<Atomic>) {
        let lower = if self.inc_min {
            Bound::Included(self.min.clone())
        } else {
            Bound::Excluded(self.min.clone())
        };
        let upper = if self.inc_max {
            Bound::Included(self.max.clone())
        } else {
            Bound::Excluded(self.max.clone())
        };
        (lower, upper)
    }
}

/// Single-value predicate: every value standing in `mode` relation to `value`.
#[derive(Clone, Debug)]
pub struct CasFilter {
    pub value: Atomic,
    pub mode: SearchMode,
    pub paths: PathFilter,
}

impl CasFilter {
    pub fn new(value: Atomic, mode: SearchMode, paths: PathFilter) -> Self {
        Self { value, mode, paths }
    }

    pub(crate) fn bounds(&self) -> (Bound<Atomic>, Bound<Atomic>) {
        let value = self.value.clone();
        match self.mode {
            SearchMode::Equal => (Bound::Included(value.clone()), Bound::Included(value)),
            SearchMode::Greater => (Bound::Excluded(value), Bound::Unbounded),
            SearchMode::GreaterOrEqual => (Bound::Included(value), Bound::Unbounded),
            SearchMode::Lower => (Bound::Unbounded, Bound::Excluded(value)),
            SearchMode::LowerOrEqual => (Bound::Unbounded, Bound::Included(value)),
        }
    }
}
