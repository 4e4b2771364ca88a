use std::fmt;
use std::str::FromStr;

use crate::node::{NodeKind, QName};
use crate::primitives::bytes::buf::{self, Cursor};
use crate::types::{PalimpsestError, Result};

/// How a step relates to the previous one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Axis {
    /// `/step`: direct child.
    Child,
    /// `//step`: any descendant.
    Descendant,
}

/// One step of a [`Path`] pattern.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathStep {
    /// Relation to the previous step.
    pub axis: Axis,
    /// Whether the step selects an attribute instead of an element.
    pub attribute: bool,
    /// Required name, `None` for the `*` wildcard.
    pub name: Option<QName>,
}

impl PathStep {
    fn accepts(&self, kind: NodeKind, name: &QName) -> bool {
        let kind_ok = if self.attribute {
            kind == NodeKind::Attribute
        } else {
            kind == NodeKind::Element
        };
        kind_ok
            && self.name.as_ref().map_or(true, |wanted| {
                wanted.local_name() == name.local_name() && wanted.prefix() == name.prefix()
            })
    }
}

/// Label path pattern such as `/library//book/@id`.
///
/// Steps compare prefix and local name; URIs are ignored.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    /// Parses a pattern. It must start with `/`; an attribute step must be last.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: &str| PalimpsestError::Usage(format!("invalid path {text:?}: {reason}"));
        let mut rest = text
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let mut steps = Vec::new();
        loop {
            let axis = match rest.strip_prefix('/') {
                Some(tail) => {
                    rest = tail;
                    Axis::Descendant
                }
                None => Axis::Child,
            };
            let (segment, tail) = match rest.find('/') {
                Some(at) => (&rest[..at], Some(&rest[at + 1..])),
                None => (rest, None),
            };
            if segment.is_empty() {
                return Err(invalid("empty step"));
            }
            if steps.last().map_or(false, |step: &PathStep| step.attribute) {
                return Err(invalid("attribute step must be last"));
            }
            let (attribute, name) = match segment.strip_prefix('@') {
                Some(name) => (true, name),
                None => (false, segment),
            };
            let name = if name == "*" {
                None
            } else {
                Some(QName::parse(name)?)
            };
            steps.push(PathStep {
                axis,
                attribute,
                name,
            });
            match tail {
                Some(tail) => rest = tail,
                None => break,
            }
        }
        Ok(Self { steps })
    }

    /// Steps of the pattern.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Whether the root-to-node label path `labels` matches the whole pattern.
    pub fn matches(&self, labels: &[(NodeKind, QName)]) -> bool {
        match_steps(&self.steps, labels)
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        buf::put_str(out, &self.to_string());
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let text = cur.string()?;
        Self::parse(&text).map_err(|_| {
            PalimpsestError::Consistency(format!("stored path {text:?} does not parse"))
        })
    }
}

fn match_steps(steps: &[PathStep], labels: &[(NodeKind, QName)]) -> bool {
    let Some((step, rest)) = steps.split_first() else {
        return labels.is_empty();
    };
    match step.axis {
        Axis::Child => labels.split_first().map_or(false, |((kind, name), tail)| {
            step.accepts(*kind, name) && match_steps(rest, tail)
        }),
        Axis::Descendant => labels.iter().enumerate().any(|(at, (kind, name))| {
            step.accepts(*kind, name) && match_steps(rest, &labels[at + 1..])
        }),
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            f.write_str(match step.axis {
                Axis::Child => "/",
                Axis::Descendant => "//",
            })?;
            if step.attribute {
                f.write_str("@")?;
            }
            match &step.name {
                Some(name) => write!(f, "{name}")?,
                None => f.write_str("*")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PalimpsestError;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}
