#![forbid(unsafe_code)]
//! Page graph of a resource.
//!
//! A revision is a tree of immutable pages: an [`UberPage`] points at the
//! [`RevisionRootPage`], which holds one record trie per [`PageKind`] plus
//! the [`NamePage`]. Record tries are [`INDIRECT_LEVELS`] levels of
//! [`IndirectPage`]s above [`RecordPage`] leaves. Unchanged subtrees are
//! shared between revisions by reference.

mod codec;
mod indirect;
mod name;
mod record;
mod reference;
mod revision_root;
mod uber;

pub use codec::{decode_page, encode_page, PAGE_FORMAT_VERSION};
pub use indirect::{
    level_offset, IndirectPage, INDIRECT_FANOUT, INDIRECT_FANOUT_EXP, INDIRECT_LEVELS,
    MAX_RECORD_PAGE_KEY,
};
pub use name::{NameKind, NamePage, NULL_NAME_KEY};
pub use record::{record_page_key, Record, RecordPage, RECORDS_PER_PAGE_EXP};
pub use reference::{LogKey, PageReference};
pub use revision_root::{HashSettings, RecordTree, RevisionRootPage};
pub use uber::UberPage;

use crate::types::{PalimpsestError, Result};

/// Record tree selector inside a revision root.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(u8)]
pub enum PageKind {
    /// Document nodes.
    Document = 1,
    /// Path summary nodes.
    PathSummary = 2,
    /// Content-and-structure index.
    CasIndex = 3,
    /// Path index.
    PathIndex = 4,
    /// Name index.
    NameIndex = 5,
}

impl PageKind {
    /// Whether trees of this kind hold a secondary index.
    pub fn is_index(self) -> bool {
        matches!(
            self,
            PageKind::CasIndex | PageKind::PathIndex | PageKind::NameIndex
        )
    }
}

impl TryFrom<u8> for PageKind {
    type Error = PalimpsestError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Document),
            2 => Ok(PageKind::PathSummary),
            3 => Ok(PageKind::CasIndex),
            4 => Ok(PageKind::PathIndex),
            5 => Ok(PageKind::NameIndex),
            other => Err(PalimpsestError::Consistency(format!(
                "unknown page kind {other}"
            ))),
        }
    }
}

/// Any page of the page graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Page {
    /// Revision chain head.
    Uber(UberPage),
    /// Root of one revision.
    RevisionRoot(RevisionRootPage),
    /// Inner trie page.
    Indirect(IndirectPage),
    /// Trie leaf holding records.
    Record(RecordPage),
    /// Name dictionaries.
    Name(NamePage),
}

impl Page {
    /// Page type name used in logs and errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Page::Uber(_) => "uber",
            Page::RevisionRoot(_) => "revision-root",
            Page::Indirect(_) => "indirect",
            Page::Record(_) => "record",
            Page::Name(_) => "name",
        }
    }

    fn unexpected(&self, expected: &str) -> PalimpsestError {
        PalimpsestError::Consistency(format!(
            "expected {expected} page, found {}",
            self.type_name()
        ))
    }

    pub fn as_uber(&self) -> Result<&UberPage> {
        match self {
            Page::Uber(page) => Ok(page),
            other => Err(other.unexpected("uber")),
        }
    }

    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match self {
            Page::RevisionRoot(page) => Ok(page),
            other => Err(other.unexpected("revision-root")),
        }
    }

    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match self {
            Page::Indirect(page) => Ok(page),
            other => Err(other.unexpected("indirect")),
        }
    }

    pub fn as_indirect_mut(&mut self) -> Result<&mut IndirectPage> {
        match self {
            Page::Indirect(page) => Ok(page),
            other => Err(other.unexpected("indirect")),
        }
    }

    pub fn as_record(&self) -> Result<&RecordPage> {
        match self {
            Page::Record(page) => Ok(page),
            other => Err(other.unexpected("record")),
        }
    }

    pub fn as_record_mut(&mut self) -> Result<&mut RecordPage> {
        match self {
            Page::Record(page) => Ok(page),
            other => Err(other.unexpected("record")),
        }
    }

    pub fn as_name(&self) -> Result<&NamePage> {
        match self {
            Page::Name(page) => Ok(page),
            other => Err(other.unexpected("name")),
        }
    }

    pub fn as_name_mut(&mut self) -> Result<&mut NamePage> {
        match self {
            Page::Name(page) => Ok(page),
            other => Err(other.unexpected("name")),
        }
    }
}
