use std::collections::BTreeMap;

use crate::index::avl::{AvlRecord, AvlRoot};
use crate::node::DocumentNode;
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::summary::PathNode;
use crate::types::{NodeKey, PalimpsestError, Result};

use super::PageKind;

/// log2 of the number of records held by one record page.
pub const RECORDS_PER_PAGE_EXP: u32 = 7;

/// Record page key holding `key`.
pub fn record_page_key(key: NodeKey) -> u64 {
    key.0 >> RECORDS_PER_PAGE_EXP
}

/// Any record that can live in a record tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// Document tree node.
    Node(DocumentNode),
    /// Path summary node.
    Path(PathNode),
    /// Node of a persistent AVL tree.
    Avl(AvlRecord),
    /// Anchor stored at key 0 of an index tree, pointing at the AVL root.
    AvlRoot(AvlRoot),
}

const TAG_NODE: u8 = 1;
const TAG_PATH: u8 = 2;
const TAG_AVL: u8 = 3;
const TAG_AVL_ROOT: u8 = 4;

impl Record {
    /// Short description used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Record::Node(_) => "document node",
            Record::Path(_) => "path node",
            Record::Avl(_) => "avl node",
            Record::AvlRoot(_) => "avl root",
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Record::Node(node) => {
                out.push(TAG_NODE);
                node.encode(out);
            }
            Record::Path(node) => {
                out.push(TAG_PATH);
                node.encode(out);
            }
            Record::Avl(node) => {
                out.push(TAG_AVL);
                node.encode(out);
            }
            Record::AvlRoot(root) => {
                out.push(TAG_AVL_ROOT);
                root.encode(out);
            }
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        match cur.u8()? {
            TAG_NODE => Ok(Record::Node(DocumentNode::decode(cur)?)),
            TAG_PATH => Ok(Record::Path(PathNode::decode(cur)?)),
            TAG_AVL => Ok(Record::Avl(AvlRecord::decode(cur)?)),
            TAG_AVL_ROOT => Ok(Record::AvlRoot(AvlRoot::decode(cur)?)),
            other => Err(PalimpsestError::Consistency(format!(
                "unknown record tag {other}"
            ))),
        }
    }
}

/// Leaf page of a record tree: records keyed by their node key.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordPage {
    kind: PageKind,
    page_key: u64,
    records: BTreeMap<NodeKey, Record>,
}

impl RecordPage {
    /// Creates an empty record page.
    pub fn new(kind: PageKind, page_key: u64) -> Self {
        Self {
            kind,
            page_key,
            records: BTreeMap::new(),
        }
    }

    /// Tree this page belongs to.
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Record page key: the node key shifted by [`RECORDS_PER_PAGE_EXP`].
    pub fn page_key(&self) -> u64 {
        self.page_key
    }

    pub fn get(&self, key: NodeKey) -> Option<&Record> {
        self.records.get(&key)
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Record> {
        self.records.get_mut(&key)
    }

    /// Stores `record`, replacing any previous record under `key`.
    pub fn insert(&mut self, key: NodeKey, record: Record) -> Result<&mut Record> {
        if record_page_key(key) != self.page_key {
            return Err(PalimpsestError::Consistency(format!(
                "record {key} does not belong to record page {}",
                self.page_key
            )));
        }
        self.records.insert(key, record);
        self.records
            .get_mut(&key)
            .ok_or(PalimpsestError::NotFound("record"))
    }

    pub fn remove(&mut self, key: NodeKey) -> Option<Record> {
        self.records.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &Record)> {
        self.records.iter()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind as u8);
        var::encode_u64(self.page_key, out);
        var::encode_u64(self.records.len() as u64, out);
        for (key, record) in &self.records {
            var::encode_u64(key.0, out);
            record.encode(out);
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let kind = PageKind::try_from(cur.u8()?)?;
        let page_key = cur.varint()?;
        let mut page = Self::new(kind, page_key);
        let count = cur.varint()?;
        for _ in 0..count {
            let key = NodeKey(cur.varint()?);
            let record = Record::decode(cur)?;
            page.insert(key, record)?;
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::avl::AvlRoot;

    #[test]
    fn insert_rejects_foreign_key() {
        let mut page = RecordPage::new(PageKind::PathIndex, 1);
        let err = page
            .insert(NodeKey(3), Record::AvlRoot(AvlRoot::default()))
            .unwrap_err();
        assert!(matches!(err, PalimpsestError::Consistency(_)));
        page.insert(NodeKey(130), Record::AvlRoot(AvlRoot::default()))
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn encode_decode_preserves_records() {
        let mut page = RecordPage::new(PageKind::NameIndex, 0);
        page.insert(
            NodeKey(0),
            Record::AvlRoot(AvlRoot {
                root: Some(NodeKey(4)),
            }),
        )
        .unwrap();
        let mut out = Vec::new();
        page.encode(&mut out);
        let decoded = RecordPage::decode(&mut Cursor::new(&out)).unwrap();
        assert_eq!(decoded, page);
    }
}
