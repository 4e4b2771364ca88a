use std::collections::BTreeMap;

use crate::index::IndexDef;
use crate::options::HashKind;
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::types::{NodeKey, PalimpsestError, Result, Revision};

use super::reference::PageReference;
use super::PageKind;

/// Root reference and key counter of one record trie.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordTree {
    /// Top-level indirect page.
    pub root: PageReference,
    /// Highest key handed out so far.
    pub max_key: Option<NodeKey>,
}

impl RecordTree {
    /// Key the next record will receive.
    pub fn next_key(&self) -> NodeKey {
        self.max_key.map_or(NodeKey(0), |key| NodeKey(key.0 + 1))
    }

    /// Raises the key counter to at least `key`.
    pub fn observe(&mut self, key: NodeKey) {
        if self.max_key.map_or(true, |max| key > max) {
            self.max_key = Some(key);
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.root.encode(out)?;
        match self.max_key {
            Some(key) => {
                out.push(1);
                var::encode_u64(key.0, out);
            }
            None => out.push(0),
        }
        Ok(())
    }

    fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let root = PageReference::decode(cur)?;
        let max_key = if cur.bool()? {
            Some(NodeKey(cur.varint()?))
        } else {
            None
        };
        Ok(Self { root, max_key })
    }
}

/// Hashing mode and seed a resource was created with.
///
/// Stored with every revision so that all revisions of a resource are
/// hashed the same way.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HashSettings {
    pub kind: HashKind,
    pub seed: u64,
}

impl HashSettings {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(match self.kind {
            HashKind::None => 0,
            HashKind::Structural => 1,
        });
        out.extend_from_slice(&self.seed.to_be_bytes());
    }

    fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let kind = match cur.u8()? {
            0 => HashKind::None,
            1 => HashKind::Structural,
            other => {
                return Err(PalimpsestError::Consistency(format!(
                    "unknown hash kind tag {other}"
                )))
            }
        };
        Ok(Self {
            kind,
            seed: cur.u64_be()?,
        })
    }
}

/// Entry point of one revision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RevisionRootPage {
    revision: Revision,
    timestamp_ms: u64,
    /// Name dictionary page.
    pub name_page: PageReference,
    /// Document node tree.
    pub document: RecordTree,
    /// Path summary tree.
    pub path_summary: RecordTree,
    indexes: BTreeMap<u32, (PageKind, RecordTree)>,
    index_defs: Vec<IndexDef>,
    hashing: Option<HashSettings>,
}

impl RevisionRootPage {
    /// Creates the empty root of the bootstrap revision.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Commit time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Copy of this root prepared for the next revision.
    pub fn successor(&self, revision: Revision) -> Self {
        let mut next = self.clone();
        next.revision = revision;
        next.timestamp_ms = 0;
        next
    }

    pub(crate) fn set_timestamp(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }

    /// Hash settings fixed when the resource was created; `None` only
    /// before the bootstrap revision is committed.
    pub fn hash_settings(&self) -> Option<HashSettings> {
        self.hashing
    }

    pub(crate) fn set_hash_settings(&mut self, settings: HashSettings) {
        self.hashing = Some(settings);
    }

    /// Record tree addressed by `kind` and `index`.
    pub fn tree(&self, kind: PageKind, index: u32) -> Result<&RecordTree> {
        match kind {
            PageKind::Document => Ok(&self.document),
            PageKind::PathSummary => Ok(&self.path_summary),
            _ => match self.indexes.get(&index) {
                Some((tree_kind, tree)) if *tree_kind == kind => Ok(tree),
                Some((tree_kind, _)) => Err(PalimpsestError::Usage(format!(
                    "index {index} is a {tree_kind:?} tree, not {kind:?}"
                ))),
                None => Err(PalimpsestError::NotFound("index tree")),
            },
        }
    }

    /// Mutable access to the record tree addressed by `kind` and `index`.
    pub fn tree_mut(&mut self, kind: PageKind, index: u32) -> Result<&mut RecordTree> {
        match kind {
            PageKind::Document => Ok(&mut self.document),
            PageKind::PathSummary => Ok(&mut self.path_summary),
            _ => match self.indexes.get_mut(&index) {
                Some((tree_kind, tree)) if *tree_kind == kind => Ok(tree),
                Some((tree_kind, _)) => Err(PalimpsestError::Usage(format!(
                    "index {index} is a {tree_kind:?} tree, not {kind:?}"
                ))),
                None => Err(PalimpsestError::NotFound("index tree")),
            },
        }
    }

    /// Registers an empty record tree for a new secondary index.
    pub fn add_index_tree(&mut self, kind: PageKind, index: u32) -> Result<()> {
        if !kind.is_index() {
            return Err(PalimpsestError::Usage(format!(
                "{kind:?} is not an index page kind"
            )));
        }
        if self.indexes.contains_key(&index) {
            return Err(PalimpsestError::Usage(format!(
                "index {index} already exists"
            )));
        }
        self.indexes.insert(index, (kind, RecordTree::default()));
        Ok(())
    }

    /// Every root reference held by this page, in a stable order.
    pub(crate) fn references_mut(&mut self) -> impl Iterator<Item = &mut PageReference> {
        std::iter::once(&mut self.name_page)
            .chain(std::iter::once(&mut self.document.root))
            .chain(std::iter::once(&mut self.path_summary.root))
            .chain(self.indexes.values_mut().map(|(_, tree)| &mut tree.root))
    }

    /// Persisted secondary index definitions.
    pub fn index_defs(&self) -> &[IndexDef] {
        &self.index_defs
    }

    pub(crate) fn push_index_def(&mut self, def: IndexDef) {
        self.index_defs.push(def);
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        var::encode_u64(u64::from(self.revision), out);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        self.name_page.encode(out)?;
        self.document.encode(out)?;
        self.path_summary.encode(out)?;
        var::encode_u64(self.indexes.len() as u64, out);
        for (index, (kind, tree)) in &self.indexes {
            var::encode_u64(u64::from(*index), out);
            out.push(*kind as u8);
            tree.encode(out)?;
        }
        var::encode_u64(self.index_defs.len() as u64, out);
        for def in &self.index_defs {
            def.encode(out);
        }
        match &self.hashing {
            Some(settings) => {
                out.push(1);
                settings.encode(out);
            }
            None => out.push(0),
        }
        Ok(())
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let revision = Revision::try_from(cur.varint()?)
            .map_err(|_| PalimpsestError::Consistency("revision out of range".into()))?;
        let timestamp_ms = cur.u64_be()?;
        let name_page = PageReference::decode(cur)?;
        let document = RecordTree::decode(cur)?;
        let path_summary = RecordTree::decode(cur)?;
        let mut indexes = BTreeMap::new();
        for _ in 0..cur.varint()? {
            let index = u32::try_from(cur.varint()?)
                .map_err(|_| PalimpsestError::Consistency("index number out of range".into()))?;
            let kind = PageKind::try_from(cur.u8()?)?;
            indexes.insert(index, (kind, RecordTree::decode(cur)?));
        }
        let mut index_defs = Vec::new();
        for _ in 0..cur.varint()? {
            index_defs.push(IndexDef::decode(cur)?);
        }
        let hashing = if cur.bool()? {
            Some(HashSettings::decode(cur)?)
        } else {
            None
        };
        Ok(Self {
            revision,
            timestamp_ms,
            name_page,
            document,
            path_summary,
            indexes,
            index_defs,
            hashing,
        })
    }
}
