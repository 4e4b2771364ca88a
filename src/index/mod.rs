#![forbid(unsafe_code)]
//! Secondary indexes over the document tree.
//!
//! Every index is a persistent AVL tree in its own record tree of the
//! revision. Three flavours exist:
//!
//! * path indexes map a PCR to the element and attribute nodes on that path,
//! * name indexes map an element name to the elements carrying it,
//! * CAS indexes map a typed value plus the PCR it occurs on to the text and
//!   attribute nodes holding it.
//!
//! Indexes are kept current by [`IndexController`], which the node write
//! transaction notifies on every structural insert and delete.

pub mod avl;
mod builder;
mod cas;
mod listener;
mod name;
mod path;
mod references;
mod scan;

pub use avl::{AvlIter, AvlNode, AvlTreeReader, AvlTreeWriter, MoveCursor, SearchMode};
pub(crate) use builder::build_index;
pub use cas::{Atomic, CasFilter, CasFilterRange, CasValue, ContentType};
pub use listener::{ChangeEvent, IndexController};
pub use name::NameFilter;
pub use path::PathFilter;
pub use references::NodeReferences;
pub use scan::{IndexReader, IndexScan};

use std::collections::BTreeSet;

use crate::node::QName;
use crate::page::PageKind;
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::summary::Path;
use crate::types::{PalimpsestError, Result};

/// Flavour of a secondary index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexType {
    Path = 0,
    Name = 1,
    Cas = 2,
}

impl IndexType {
    /// Record tree kind holding indexes of this flavour.
    pub fn page_kind(self) -> PageKind {
        match self {
            IndexType::Path => PageKind::PathIndex,
            IndexType::Name => PageKind::NameIndex,
            IndexType::Cas => PageKind::CasIndex,
        }
    }
}

/// Kind of structural change reported to index listeners.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Delete,
}

/// Definition of one secondary index.
///
/// Definitions are persisted in the revision root. The id is assigned when
/// the index is created and doubles as the number of its record tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    id: u32,
    index_type: IndexType,
    paths: BTreeSet<Path>,
    included: BTreeSet<QName>,
    excluded: BTreeSet<QName>,
    content_type: ContentType,
}

impl IndexDef {
    /// Path index over `paths`; an empty set indexes every path.
    pub fn path(paths: impl IntoIterator<Item = Path>) -> Self {
        Self {
            id: 0,
            index_type: IndexType::Path,
            paths: paths.into_iter().collect(),
            included: BTreeSet::new(),
            excluded: BTreeSet::new(),
            content_type: ContentType::Str,
        }
    }

    /// Name index. With an empty include list every name not excluded is
    /// indexed.
    pub fn name(
        included: impl IntoIterator<Item = QName>,
        excluded: impl IntoIterator<Item = QName>,
    ) -> Self {
        Self {
            id: 0,
            index_type: IndexType::Name,
            paths: BTreeSet::new(),
            included: included.into_iter().collect(),
            excluded: excluded.into_iter().collect(),
            content_type: ContentType::Str,
        }
    }

    /// CAS index over values of `content_type` found on `paths`.
    pub fn cas(content_type: ContentType, paths: impl IntoIterator<Item = Path>) -> Self {
        Self {
            id: 0,
            index_type: IndexType::Cas,
            paths: paths.into_iter().collect(),
            included: BTreeSet::new(),
            excluded: BTreeSet::new(),
            content_type,
        }
    }

    pub(crate) fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Record tree kind of this index.
    pub fn page_kind(&self) -> PageKind {
        self.index_type.page_kind()
    }

    pub fn paths(&self) -> &BTreeSet<Path> {
        &self.paths
    }

    pub fn included(&self) -> &BTreeSet<QName> {
        &self.included
    }

    pub fn excluded(&self) -> &BTreeSet<QName> {
        &self.excluded
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        var::encode_u64(u64::from(self.id), out);
        out.push(self.index_type as u8);
        out.push(self.content_type as u8);
        var::encode_u64(self.paths.len() as u64, out);
        for path in &self.paths {
            path.encode(out);
        }
        for names in [&self.included, &self.excluded] {
            var::encode_u64(names.len() as u64, out);
            for name in names {
                name.encode(out);
            }
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let id = u32::try_from(cur.varint()?)
            .map_err(|_| PalimpsestError::Consistency("index id out of range".into()))?;
        let index_type = match cur.u8()? {
            0 => IndexType::Path,
            1 => IndexType::Name,
            2 => IndexType::Cas,
            other => {
                return Err(PalimpsestError::Consistency(format!(
                    "unknown index type {other}"
                )))
            }
        };
        let content_type = ContentType::try_from(cur.u8()?)?;
        let mut paths = BTreeSet::new();
        for _ in 0..cur.varint()? {
            paths.insert(Path::decode(cur)?);
        }
        let mut included = BTreeSet::new();
        for _ in 0..cur.varint()? {
            included.insert(QName::decode(cur)?);
        }
        let mut excluded = BTreeSet::new();
        for _ in 0..cur.varint()? {
            excluded.insert(QName::decode(cur)?);
        }
        Ok(Self {
            id,
            index_type,
            paths,
            included,
            excluded,
            content_type,
        })
    }
}
