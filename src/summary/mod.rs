#![forbid(unsafe_code)]
//! Path summary: one node per distinct root-to-node label path.
//!
//! The key of a path node is its path class record (PCR). Path nodes are
//! reference counted by the document nodes sharing the path and live in the
//! `PathSummary` record tree, so they version like every other record.

mod path;

pub use path::{Axis, Path, PathStep};

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::node::{NameDelegate, NodeDelegate, NodeKind, QName, StructDelegate};
use crate::page::{NameKind, PageKind, Record, NULL_NAME_KEY};
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::trx::{PageWriteTrx, RecordReader};
use crate::types::{NodeKey, PalimpsestError, Pcr, Result};

/// PCR of the path summary root.
pub const ROOT_PCR: Pcr = 0;

/// A node of the path summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
    pub node: NodeDelegate,
    pub structure: StructDelegate,
    pub name: NameDelegate,
    /// Resolved label.
    pub qname: QName,
    /// Kind of the document nodes on this path.
    pub path_kind: NodeKind,
    /// Number of document nodes on this path; always positive.
    pub references: u32,
    /// Depth below the root.
    pub level: u32,
}

impl PathNode {
    /// PCR of this node.
    pub fn pcr(&self) -> Pcr {
        self.node.node_key.0
    }

    pub fn increment_reference_count(&mut self) {
        self.references += 1;
    }

    /// Drops one reference. A path node is removed instead of being
    /// decremented to zero.
    pub fn decrement_reference_count(&mut self) -> Result<()> {
        if self.references <= 1 {
            return Err(PalimpsestError::Usage(format!(
                "path node {} would drop to zero references",
                self.pcr()
            )));
        }
        self.references -= 1;
        Ok(())
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        self.node.encode(out);
        self.structure.encode(out);
        self.name.encode(out);
        self.qname.encode(out);
        out.push(self.path_kind as u8);
        var::encode_u64(u64::from(self.references), out);
        var::encode_u64(u64::from(self.level), out);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let node = NodeDelegate::decode(cur)?;
        let structure = StructDelegate::decode(cur)?;
        let name = NameDelegate::decode(cur)?;
        let qname = QName::decode(cur)?;
        let path_kind = NodeKind::try_from(cur.u8()?)?;
        let references = u32::try_from(cur.varint()?)
            .map_err(|_| PalimpsestError::Consistency("path reference count overflow".into()))?;
        let level = u32::try_from(cur.varint()?)
            .map_err(|_| PalimpsestError::Consistency("path level overflow".into()))?;
        Ok(Self {
            node,
            structure,
            name,
            qname,
            path_kind,
            references,
            level,
        })
    }
}

/// PCRs matching a set of path patterns, with the PCR high-water mark at
/// the time of resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcrValue {
    pub max_pcr: Pcr,
    pub pcrs: BTreeSet<Pcr>,
}

/// Read access to a path summary.
pub struct PathSummaryReader<'a, R: RecordReader + ?Sized> {
    trx: &'a R,
}

impl<'a, R: RecordReader + ?Sized> PathSummaryReader<'a, R> {
    pub fn new(trx: &'a R) -> Self {
        Self { trx }
    }

    /// Path node with key `pcr`.
    pub fn path_node(&self, pcr: Pcr) -> Result<Option<PathNode>> {
        match self.trx.record(NodeKey(pcr), PageKind::PathSummary, 0)? {
            Some(Record::Path(node)) => Ok(Some(node)),
            Some(other) => Err(PalimpsestError::Consistency(format!(
                "path summary key {pcr} holds a {}",
                other.describe()
            ))),
            None => Ok(None),
        }
    }

    fn require(&self, pcr: Pcr) -> Result<PathNode> {
        self.path_node(pcr)?
            .ok_or(PalimpsestError::NotFound("path node"))
    }

    /// Highest PCR handed out so far.
    pub fn max_pcr(&self) -> Result<Pcr> {
        Ok(self
            .trx
            .max_record_key(PageKind::PathSummary, 0)?
            .map_or(ROOT_PCR, |key| key.0))
    }

    /// Children of `pcr` in sibling order.
    pub fn children(&self, pcr: Pcr) -> Result<Vec<PathNode>> {
        let mut next = self.require(pcr)?.structure.first_child;
        let mut children = Vec::new();
        while let Some(key) = next {
            let child = self.require(key.0)?;
            next = child.structure.right_sibling;
            children.push(child);
        }
        Ok(children)
    }

    /// Child of `parent` with the given label.
    pub fn find_child(&self, parent: Pcr, kind: NodeKind, name: &QName) -> Result<Option<PathNode>> {
        Ok(self
            .children(parent)?
            .into_iter()
            .find(|child| child.path_kind == kind && &child.qname == name))
    }

    /// Labels from the root (exclusive) down to `pcr`.
    pub fn labels(&self, pcr: Pcr) -> Result<Vec<(NodeKind, QName)>> {
        let mut labels = Vec::new();
        let mut current = pcr;
        while current != ROOT_PCR {
            let node = self.require(current)?;
            current = node
                .node
                .parent_key
                .ok_or_else(|| PalimpsestError::Consistency(format!("path node {pcr} detached")))?
                .0;
            labels.push((node.path_kind, node.qname));
        }
        labels.reverse();
        Ok(labels)
    }

    /// Resolves `paths` to every instantiated PCR matching any of them.
    pub fn get_pcrs_for_paths(&self, paths: &[Path]) -> Result<PcrValue> {
        let max_pcr = self.max_pcr()?;
        let mut pcrs = BTreeSet::new();
        // Parents always have smaller keys than their children.
        let mut labels: FxHashMap<Pcr, Vec<(NodeKind, QName)>> = FxHashMap::default();
        labels.insert(ROOT_PCR, Vec::new());
        for pcr in ROOT_PCR + 1..=max_pcr {
            let Some(node) = self.path_node(pcr)? else {
                continue;
            };
            let parent = node.node.parent_key.map_or(ROOT_PCR, |key| key.0);
            let mut own = match labels.get(&parent) {
                Some(parent_labels) => parent_labels.clone(),
                None => self.labels(parent)?,
            };
            own.push((node.path_kind, node.qname));
            if paths.iter().any(|path| path.matches(&own)) {
                pcrs.insert(pcr);
            }
            labels.insert(pcr, own);
        }
        trace!(paths = paths.len(), matched = pcrs.len(), max_pcr, "summary.resolve_paths");
        Ok(PcrValue { max_pcr, pcrs })
    }
}

/// Maintains the path summary inside a write transaction.
pub struct PathSummaryWriter<'a> {
    trx: &'a mut PageWriteTrx,
}

impl<'a> PathSummaryWriter<'a> {
    pub fn new(trx: &'a mut PageWriteTrx) -> Self {
        Self { trx }
    }

    fn reader(&self) -> PathSummaryReader<'_, PageWriteTrx> {
        PathSummaryReader::new(&*self.trx)
    }

    fn modify(&mut self, pcr: Pcr) -> Result<&mut PathNode> {
        match self
            .trx
            .prepare_entry_for_modification(NodeKey(pcr), PageKind::PathSummary, 0)?
        {
            Record::Path(node) => Ok(node),
            other => Err(PalimpsestError::Consistency(format!(
                "path summary key {pcr} holds a {}",
                other.describe()
            ))),
        }
    }

    /// Creates the root path node of a fresh resource.
    pub fn initialize(&mut self) -> Result<()> {
        let key = self.trx.new_record_key(PageKind::PathSummary, 0)?;
        if key.0 != ROOT_PCR {
            return Err(PalimpsestError::Usage("path summary already initialized".into()));
        }
        let revision = self.trx.revision();
        let root = PathNode {
            node: NodeDelegate::new(key, None, revision),
            structure: StructDelegate::default(),
            name: NameDelegate {
                prefix_key: NULL_NAME_KEY,
                local_name_key: NULL_NAME_KEY,
                uri_key: NULL_NAME_KEY,
                path_node_key: ROOT_PCR,
            },
            qname: QName::default(),
            path_kind: NodeKind::DocumentRoot,
            references: 1,
            level: 0,
        };
        self.trx
            .create_entry(key, Record::Path(root), PageKind::PathSummary, 0)?;
        Ok(())
    }

    /// PCR of the path `parent/name`, creating the path node on first use and
    /// adding one reference either way.
    pub fn get_or_insert(&mut self, parent: Pcr, kind: NodeKind, name: &QName) -> Result<Pcr> {
        if let Some(existing) = self.reader().find_child(parent, kind, name)? {
            let pcr = existing.pcr();
            self.modify(pcr)?.increment_reference_count();
            return Ok(pcr);
        }
        let parent_node = self
            .reader()
            .path_node(parent)?
            .ok_or(PalimpsestError::NotFound("path node"))?;
        let name_kind = match kind {
            NodeKind::Attribute => NameKind::Attribute,
            _ => NameKind::Element,
        };
        let names = self.trx.name_page_mut()?;
        let prefix_key = names.set_name(name_kind, name.prefix())?;
        let local_name_key = names.set_name(name_kind, name.local_name())?;
        let uri_key = names.set_name(NameKind::Namespace, name.uri())?;

        let key = self.trx.new_record_key(PageKind::PathSummary, 0)?;
        let revision = self.trx.revision();
        let old_first = parent_node.structure.first_child;
        let node = PathNode {
            node: NodeDelegate::new(key, Some(NodeKey(parent)), revision),
            structure: StructDelegate {
                right_sibling: old_first,
                ..StructDelegate::default()
            },
            name: NameDelegate {
                prefix_key,
                local_name_key,
                uri_key,
                path_node_key: key.0,
            },
            qname: name.clone(),
            path_kind: kind,
            references: 1,
            level: parent_node.level + 1,
        };
        self.trx
            .create_entry(key, Record::Path(node), PageKind::PathSummary, 0)?;
        if let Some(first) = old_first {
            self.modify(first.0)?.structure.left_sibling = Some(key);
        }
        let parent_mut = self.modify(parent)?;
        parent_mut.structure.first_child = Some(key);
        parent_mut.structure.child_count += 1;
        self.adjust_descendants(parent, 1)?;
        trace!(pcr = key.0, parent, name = %name, "summary.path_node.created");
        Ok(key.0)
    }

    /// Drops one reference to `pcr`, deleting the node with its last one.
    pub fn release(&mut self, pcr: Pcr) -> Result<()> {
        if pcr == ROOT_PCR {
            return Err(PalimpsestError::Usage("cannot release the path summary root".into()));
        }
        let node = self
            .reader()
            .path_node(pcr)?
            .ok_or(PalimpsestError::NotFound("path node"))?;
        if node.references > 1 {
            return self.modify(pcr)?.decrement_reference_count();
        }
        if node.structure.first_child.is_some() {
            return Err(PalimpsestError::Consistency(format!(
                "path node {pcr} still has children"
            )));
        }
        let parent = node
            .node
            .parent_key
            .ok_or_else(|| PalimpsestError::Consistency(format!("path node {pcr} detached")))?;
        if let Some(left) = node.structure.left_sibling {
            self.modify(left.0)?.structure.right_sibling = node.structure.right_sibling;
        } else {
            self.modify(parent.0)?.structure.first_child = node.structure.right_sibling;
        }
        if let Some(right) = node.structure.right_sibling {
            self.modify(right.0)?.structure.left_sibling = node.structure.left_sibling;
        }
        self.modify(parent.0)?.structure.child_count -= 1;
        self.adjust_descendants(parent.0, -1)?;

        let name_kind = match node.path_kind {
            NodeKind::Attribute => NameKind::Attribute,
            _ => NameKind::Element,
        };
        let names = self.trx.name_page_mut()?;
        names.remove_name(name_kind, node.name.prefix_key)?;
        names.remove_name(name_kind, node.name.local_name_key)?;
        names.remove_name(NameKind::Namespace, node.name.uri_key)?;
        self.trx
            .remove_entry(NodeKey(pcr), PageKind::PathSummary, 0)?;
        trace!(pcr, "summary.path_node.removed");
        Ok(())
    }

    fn adjust_descendants(&mut self, from: Pcr, delta: i64) -> Result<()> {
        let mut next = Some(NodeKey(from));
        while let Some(key) = next {
            let node = self.modify(key.0)?;
            node.structure.descendant_count = node
                .structure
                .descendant_count
                .checked_add_signed(delta)
                .ok_or_else(|| PalimpsestError::Consistency("descendant count underflow".into()))?;
            next = node.node.parent_key;
        }
        Ok(())
    }
}
