use crate::index::IndexReader;
use crate::summary::PathSummaryReader;
use crate::trx::{PageReadTrx, RecordReader};
use crate::types::{NodeKey, PalimpsestError, Pcr, Result, Revision};

use super::{load_node, resolve_name, DocumentNode, NodeKind, QName};

/// Cursor navigation over the document tree of one revision.
///
/// Every `move_to*` method returns `Ok(false)` and leaves the cursor where
/// it was when the target does not exist.
pub trait NodeReader {
    /// Records the cursor reads from.
    fn records(&self) -> &dyn RecordReader;

    /// Node under the cursor.
    fn current(&self) -> &DocumentNode;

    #[doc(hidden)]
    fn set_current(&mut self, node: DocumentNode);

    fn revision(&self) -> Revision {
        self.records().revision()
    }

    fn node_key(&self) -> NodeKey {
        self.current().node_key()
    }

    fn kind(&self) -> NodeKind {
        self.current().kind()
    }

    /// Node with key `key`, without moving.
    fn node(&self, key: NodeKey) -> Result<Option<DocumentNode>> {
        load_node(self.records(), key)
    }

    fn move_to(&mut self, key: NodeKey) -> Result<bool> {
        match self.node(key)? {
            Some(node) => {
                self.set_current(node);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn move_to_document_root(&mut self) -> Result<bool> {
        self.move_to(NodeKey::ROOT)
    }

    fn move_to_parent(&mut self) -> Result<bool> {
        match self.current().parent_key() {
            Some(parent) => self.move_to(parent),
            None => Ok(false),
        }
    }

    fn move_to_first_child(&mut self) -> Result<bool> {
        match self.current().structure().and_then(|s| s.first_child) {
            Some(child) => self.move_to(child),
            None => Ok(false),
        }
    }

    fn move_to_right_sibling(&mut self) -> Result<bool> {
        match self.current().structure().and_then(|s| s.right_sibling) {
            Some(sibling) => self.move_to(sibling),
            None => Ok(false),
        }
    }

    fn move_to_left_sibling(&mut self) -> Result<bool> {
        match self.current().structure().and_then(|s| s.left_sibling) {
            Some(sibling) => self.move_to(sibling),
            None => Ok(false),
        }
    }

    /// Moves to the `index`-th attribute of the current element.
    fn move_to_attribute(&mut self, index: usize) -> Result<bool> {
        let key = self
            .current()
            .as_element()
            .and_then(|element| element.attributes.get(index).copied());
        match key {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the attribute of the current element named `name`.
    fn move_to_attribute_by_name(&mut self, name: &QName) -> Result<bool> {
        let Some(key) = self.attribute_key(name)? else {
            return Ok(false);
        };
        self.move_to(key)
    }

    /// Moves to the `index`-th namespace declaration of the current element.
    fn move_to_namespace(&mut self, index: usize) -> Result<bool> {
        let key = self
            .current()
            .as_element()
            .and_then(|element| element.namespaces.get(index).copied());
        match key {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Key of the current element's attribute named `name`.
    fn attribute_key(&self, name: &QName) -> Result<Option<NodeKey>> {
        let Some(element) = self.current().as_element() else {
            return Ok(None);
        };
        for key in &element.attributes {
            let attribute = self
                .node(*key)?
                .ok_or(PalimpsestError::NotFound("attribute"))?;
            if let Some(delegate) = attribute.name() {
                if &resolve_name(self.records(), NodeKind::Attribute, delegate)? == name {
                    return Ok(Some(*key));
                }
            }
        }
        Ok(None)
    }

    fn attribute_count(&self) -> usize {
        self.current()
            .as_element()
            .map_or(0, |element| element.attributes.len())
    }

    fn namespace_count(&self) -> usize {
        self.current()
            .as_element()
            .map_or(0, |element| element.namespaces.len())
    }

    fn child_count(&self) -> u64 {
        self.current().structure().map_or(0, |s| s.child_count)
    }

    fn descendant_count(&self) -> u64 {
        self.current().structure().map_or(0, |s| s.descendant_count)
    }

    /// Qualified name of the current node, if its kind has one.
    fn name(&self) -> Result<Option<QName>> {
        let node = self.current();
        match node.name() {
            Some(delegate) => resolve_name(self.records(), node.kind(), delegate).map(Some),
            None => Ok(None),
        }
    }

    /// Raw value of the current node, if its kind has one.
    fn value(&self) -> Result<Option<Vec<u8>>> {
        match self.current().value() {
            Some(value) => Ok(Some(value.raw()?.into_owned())),
            None => Ok(None),
        }
    }

    /// Value decoded as UTF-8.
    fn value_string(&self) -> Result<Option<String>> {
        match self.value()? {
            Some(raw) => String::from_utf8(raw)
                .map(Some)
                .map_err(|_| PalimpsestError::Consistency("value is not valid UTF-8".into())),
            None => Ok(None),
        }
    }

    /// Structural hash, `None` when hashing is off or not yet recomputed.
    fn hash(&self) -> Option<u128> {
        self.current().hash()
    }

    /// Order label attached to the current node, if any.
    fn order_label(&self) -> Option<&[u8]> {
        self.current().delegate().order_label.as_deref()
    }

    /// Path class of the current element, attribute or namespace.
    fn path_node_key(&self) -> Option<Pcr> {
        self.current().name().map(|name| name.path_node_key)
    }
}

/// Read-only cursor over a committed revision.
pub struct NodeReadTrx {
    trx: PageReadTrx,
    current: DocumentNode,
}

impl NodeReadTrx {
    /// Opens a cursor positioned at the document root.
    pub(crate) fn new(trx: PageReadTrx) -> Result<Self> {
        let current =
            load_node(&trx, NodeKey::ROOT)?.ok_or(PalimpsestError::NotFound("document root"))?;
        Ok(Self { trx, current })
    }

    /// Underlying page transaction.
    pub fn page_trx(&self) -> &PageReadTrx {
        &self.trx
    }

    pub fn path_summary(&self) -> PathSummaryReader<'_, PageReadTrx> {
        PathSummaryReader::new(&self.trx)
    }

    /// Secondary index scans on this revision.
    pub fn indexes(&self) -> IndexReader<'_, PageReadTrx> {
        IndexReader::new(&self.trx)
    }
}

impl NodeReader for NodeReadTrx {
    fn records(&self) -> &dyn RecordReader {
        &self.trx
    }

    fn current(&self) -> &DocumentNode {
        &self.current
    }

    fn set_current(&mut self, node: DocumentNode) {
        self.current = node;
    }
}
