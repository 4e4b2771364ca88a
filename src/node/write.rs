use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::index::{build_index, ChangeEvent, ChangeType, IndexController, IndexDef, IndexReader};
use crate::options::{HashKind, ResourceOptions};
use crate::page::{HashSettings, NameKind, PageKind, Record};
use crate::summary::{PathSummaryReader, PathSummaryWriter, ROOT_PCR};
use crate::trx::{PageWriteTrx, RecordReader};
use crate::types::{NodeKey, PalimpsestError, Pcr, Result, Revision};

use super::read::NodeReader;
use super::{
    load_node, preorder, resolve_name, AttributeNode, CommentNode, DocumentNode, DocumentRootNode,
    ElementNode, NameDelegate, NamespaceNode, NodeDelegate, NodeHasher, NodeKind, PiNode, QName,
    StructDelegate, TextNode, ValueDelegate,
};

/// Hashing and value storage settings of a node write transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    pub hasher: NodeHasher,
    pub hash_kind: HashKind,
    /// Values longer than this are stored snappy-compressed.
    pub compress_values_over: Option<usize>,
}

impl NodeConfig {
    pub fn from_options(options: &ResourceOptions) -> Self {
        Self {
            hasher: NodeHasher::new(options.hash_seed),
            hash_kind: options.hash_kind,
            compress_values_over: options.compress_values_over,
        }
    }

    /// Hashing mode and seed as persisted with the resource.
    pub fn hash_settings(&self) -> HashSettings {
        HashSettings {
            kind: self.hash_kind,
            seed: self.hasher.seed(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from_options(&ResourceOptions::default())
    }
}

#[derive(Copy, Clone, Debug)]
enum Position {
    FirstChild,
    RightSibling,
}

enum NewNode<'n> {
    Element(&'n QName),
    Text(&'n [u8]),
    Comment(&'n [u8]),
    Pi(&'n QName, &'n [u8]),
}

impl NewNode<'_> {
    fn kind(&self) -> NodeKind {
        match self {
            NewNode::Element(_) => NodeKind::Element,
            NewNode::Text(_) => NodeKind::Text,
            NewNode::Comment(_) => NodeKind::Comment,
            NewNode::Pi(..) => NodeKind::ProcessingInstruction,
        }
    }
}

/// Cursor that edits the document tree of the revision being written.
///
/// Every edit keeps the path summary, the secondary indexes and the
/// structural hashes consistent: indexes are updated synchronously, hashes
/// are invalidated up the ancestor chain and recomputed at commit.
pub struct NodeWriteTrx {
    trx: PageWriteTrx,
    current: DocumentNode,
    config: NodeConfig,
    indexes: IndexController,
    fault: Option<String>,
}

impl NodeWriteTrx {
    /// Wraps a page write transaction, creating the document root and the
    /// path summary root when the resource is still empty.
    ///
    /// Fails with [`PalimpsestError::Usage`] when `config` hashes differently
    /// from the settings the resource was created with.
    pub(crate) fn new(mut trx: PageWriteTrx, config: NodeConfig) -> Result<Self> {
        trx.adopt_hash_settings(config.hash_settings())?;
        if load_node(&trx, NodeKey::ROOT)?.is_none() {
            initialize_document(&mut trx)?;
        }
        let indexes = IndexController::new(trx.index_defs());
        let current =
            load_node(&trx, NodeKey::ROOT)?.ok_or(PalimpsestError::NotFound("document root"))?;
        Ok(Self {
            trx,
            current,
            config,
            indexes,
            fault: None,
        })
    }

    /// Runs an edit. An edit that fails after changing anything leaves the
    /// transaction half-applied, so every later edit and the commit are
    /// refused. Edits rejected before any change keep the transaction usable.
    fn guarded<T>(&mut self, edit: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(fault) = &self.fault {
            return Err(PalimpsestError::Usage(format!(
                "write transaction aborted by an earlier failure: {fault}"
            )));
        }
        let before = self.trx.edits();
        let result = edit(self);
        if let Err(err) = &result {
            if self.trx.edits() != before {
                warn!(revision = self.trx.revision(), error = %err, "node.write.poisoned");
                self.fault = Some(err.to_string());
            }
        }
        result
    }

    /// Whether an earlier failed edit has doomed this transaction.
    pub fn is_poisoned(&self) -> bool {
        self.fault.is_some()
    }

    pub fn page_trx(&self) -> &PageWriteTrx {
        &self.trx
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Path summary including uncommitted changes.
    pub fn path_summary(&self) -> PathSummaryReader<'_, PageWriteTrx> {
        PathSummaryReader::new(&self.trx)
    }

    /// Scans over the in-flight indexes.
    pub fn indexes(&self) -> IndexReader<'_, PageWriteTrx> {
        IndexReader::new(&self.trx)
    }

    /// Creates a secondary index and builds it from the current document.
    /// Returns the definition with its assigned id.
    pub fn create_index(&mut self, def: IndexDef) -> Result<IndexDef> {
        self.guarded(|this| build_index(&mut this.trx, &mut this.indexes, def))
    }

    pub fn insert_element_as_first_child(&mut self, name: &QName) -> Result<NodeKey> {
        self.insert_structural(Position::FirstChild, NewNode::Element(name))
    }

    pub fn insert_element_as_right_sibling(&mut self, name: &QName) -> Result<NodeKey> {
        self.insert_structural(Position::RightSibling, NewNode::Element(name))
    }

    pub fn insert_text_as_first_child(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.insert_structural(Position::FirstChild, NewNode::Text(value))
    }

    pub fn insert_text_as_right_sibling(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.insert_structural(Position::RightSibling, NewNode::Text(value))
    }

    pub fn insert_comment_as_first_child(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.insert_structural(Position::FirstChild, NewNode::Comment(value))
    }

    pub fn insert_comment_as_right_sibling(&mut self, value: &[u8]) -> Result<NodeKey> {
        self.insert_structural(Position::RightSibling, NewNode::Comment(value))
    }

    /// Inserts a processing instruction; `target` becomes its local name.
    pub fn insert_pi_as_first_child(&mut self, target: &str, content: &[u8]) -> Result<NodeKey> {
        let target = QName::local(target);
        self.insert_structural(Position::FirstChild, NewNode::Pi(&target, content))
    }

    /// Adds an attribute to the current element and moves to it.
    pub fn insert_attribute(&mut self, name: &QName, value: &[u8]) -> Result<NodeKey> {
        self.guarded(|this| this.attach_attribute(name, value))
    }

    fn attach_attribute(&mut self, name: &QName, value: &[u8]) -> Result<NodeKey> {
        let element = self
            .current
            .as_element()
            .cloned()
            .ok_or_else(|| PalimpsestError::Usage("attributes belong to elements".into()))?;
        if self.attribute_key(name)?.is_some() {
            return Err(PalimpsestError::Usage(format!("duplicate attribute {name}")));
        }
        let key = self.trx.new_record_key(PageKind::Document, 0)?;
        let mut delegate = self.intern(NodeKind::Attribute, name)?;
        delegate.path_node_key = PathSummaryWriter::new(&mut self.trx).get_or_insert(
            element.name.path_node_key,
            NodeKind::Attribute,
            name,
        )?;
        let node = DocumentNode::Attribute(AttributeNode {
            node: NodeDelegate::new(key, Some(element.node.node_key), self.trx.revision()),
            name: delegate,
            value: ValueDelegate::new(value, self.config.compress_values_over),
        });
        self.trx
            .create_entry(key, Record::Node(node), PageKind::Document, 0)?;
        self.modify_element(element.node.node_key)?.attributes.push(key);
        self.finish_insert(key)
    }

    /// Declares `prefix` (empty for the default namespace) on the current
    /// element and moves to the declaration.
    pub fn insert_namespace(&mut self, prefix: &str, uri: &str) -> Result<NodeKey> {
        self.guarded(|this| this.attach_namespace(prefix, uri))
    }

    fn attach_namespace(&mut self, prefix: &str, uri: &str) -> Result<NodeKey> {
        let element = self
            .current
            .as_element()
            .cloned()
            .ok_or_else(|| PalimpsestError::Usage("namespaces belong to elements".into()))?;
        let name = QName::new("", prefix, uri);
        if self.namespace_taken(&element, &name, None)? {
            return Err(PalimpsestError::Usage(format!(
                "namespace prefix {prefix:?} already declared"
            )));
        }
        let key = self.trx.new_record_key(PageKind::Document, 0)?;
        let mut delegate = self.intern(NodeKind::Namespace, &name)?;
        delegate.path_node_key = element.name.path_node_key;
        let node = DocumentNode::Namespace(NamespaceNode {
            node: NodeDelegate::new(key, Some(element.node.node_key), self.trx.revision()),
            name: delegate,
        });
        self.trx
            .create_entry(key, Record::Node(node), PageKind::Document, 0)?;
        self.modify_element(element.node.node_key)?.namespaces.push(key);
        self.finish_insert(key)
    }

    /// Replaces the value of the current attribute, text, comment or
    /// processing instruction.
    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        self.guarded(|this| this.replace_value(value))
    }

    fn replace_value(&mut self, value: &[u8]) -> Result<()> {
        let key = self.current.node_key();
        if self.current.value().is_none() {
            return Err(PalimpsestError::Usage(format!(
                "{:?} nodes carry no value",
                self.current.kind()
            )));
        }
        self.notify(ChangeType::Delete, key)?;
        let stored = ValueDelegate::new(value, self.config.compress_values_over);
        *self
            .modify(key)?
            .value_mut()
            .ok_or_else(|| PalimpsestError::Consistency("value node lost its value".into()))? =
            stored;
        self.notify(ChangeType::Insert, key)?;
        self.invalidate_hashes(key)?;
        self.refresh()
    }

    /// Renames the current element, attribute, namespace or processing
    /// instruction. Renaming an element moves its whole subtree to new path
    /// classes.
    pub fn set_name(&mut self, name: &QName) -> Result<()> {
        self.guarded(|this| this.rename(name))
    }

    fn rename(&mut self, name: &QName) -> Result<()> {
        let node = self.current.clone();
        let key = node.node_key();
        let kind = node.kind();
        let old = *node
            .name()
            .ok_or_else(|| PalimpsestError::Usage(format!("{kind:?} nodes carry no name")))?;
        if &resolve_name(&self.trx, kind, &old)? == name {
            return Ok(());
        }
        match kind {
            NodeKind::Element => self.rename_element(&node, name)?,
            NodeKind::Attribute => {
                let parent = self.parent_of(&node)?;
                if self.attribute_taken(&parent, name)? {
                    return Err(PalimpsestError::Usage(format!("duplicate attribute {name}")));
                }
                self.notify(ChangeType::Delete, key)?;
                let mut renamed = self.intern(kind, name)?;
                renamed.path_node_key = PathSummaryWriter::new(&mut self.trx).get_or_insert(
                    parent_pcr(&parent),
                    NodeKind::Attribute,
                    name,
                )?;
                PathSummaryWriter::new(&mut self.trx).release(old.path_node_key)?;
                self.release_names(kind, &old)?;
                self.set_name_delegate(key, renamed)?;
                self.notify(ChangeType::Insert, key)?;
            }
            _ => {
                if kind == NodeKind::Namespace {
                    let parent = self.parent_of(&node)?;
                    let element = parent.as_element().ok_or_else(|| {
                        PalimpsestError::Consistency("namespace outside an element".into())
                    })?;
                    if self.namespace_taken(element, name, Some(key))? {
                        return Err(PalimpsestError::Usage(format!(
                            "namespace prefix {:?} already declared",
                            name.local_name()
                        )));
                    }
                }
                let mut renamed = self.intern(kind, name)?;
                renamed.path_node_key = old.path_node_key;
                self.release_names(kind, &old)?;
                self.set_name_delegate(key, renamed)?;
            }
        }
        self.invalidate_hashes(key)?;
        self.refresh()
    }

    /// Removes the current node with its subtree. The cursor moves to the
    /// right sibling, else the left sibling, else the parent.
    pub fn remove(&mut self) -> Result<()> {
        self.guarded(Self::remove_subtree)
    }

    fn remove_subtree(&mut self) -> Result<()> {
        let node = self.current.clone();
        let key = node.node_key();
        if node.kind() == NodeKind::DocumentRoot {
            return Err(PalimpsestError::Usage("the document root cannot be removed".into()));
        }
        let parent_key = node
            .parent_key()
            .ok_or_else(|| PalimpsestError::Consistency(format!("node {key} has no parent")))?;
        let subtree = preorder(&self.trx, key)?;
        for victim_key in subtree.iter().rev() {
            self.notify(ChangeType::Delete, *victim_key)?;
            let victim = self.require(*victim_key)?;
            if let Some(delegate) = victim.name().copied() {
                if matches!(victim.kind(), NodeKind::Element | NodeKind::Attribute) {
                    PathSummaryWriter::new(&mut self.trx).release(delegate.path_node_key)?;
                }
                self.release_names(victim.kind(), &delegate)?;
            }
            self.trx
                .remove_entry(*victim_key, PageKind::Document, 0)?;
        }

        let next = match node.kind() {
            NodeKind::Attribute => {
                self.modify_element(parent_key)?
                    .attributes
                    .retain(|attribute| *attribute != key);
                parent_key
            }
            NodeKind::Namespace => {
                self.modify_element(parent_key)?
                    .namespaces
                    .retain(|namespace| *namespace != key);
                parent_key
            }
            _ => {
                let links = node.structure().cloned().unwrap_or_default();
                match links.left_sibling {
                    Some(left) => self.modify_structure(left)?.right_sibling = links.right_sibling,
                    None => self.modify_structure(parent_key)?.first_child = links.right_sibling,
                }
                if let Some(right) = links.right_sibling {
                    self.modify_structure(right)?.left_sibling = links.left_sibling;
                }
                let parent = self.modify_structure(parent_key)?;
                parent.child_count = parent.child_count.checked_sub(1).ok_or_else(|| {
                    PalimpsestError::Consistency("child count underflow".into())
                })?;
                let removed = i64::try_from(links.descendant_count + 1)
                    .map_err(|_| PalimpsestError::Consistency("subtree too large".into()))?;
                self.adjust_descendants(parent_key, -removed)?;
                links.right_sibling.or(links.left_sibling).unwrap_or(parent_key)
            }
        };
        self.invalidate_hashes(parent_key)?;
        self.current = self.require(next)?;
        trace!(node = key.0, removed = subtree.len(), "node.remove");
        Ok(())
    }

    /// Attaches an opaque order label to the current node, or clears it.
    /// Labels are stored as given and play no part in ordering or hashing.
    pub fn set_order_label(&mut self, label: Option<&[u8]>) -> Result<()> {
        self.guarded(|this| {
            let key = this.current.node_key();
            this.modify(key)?.delegate_mut().order_label = label.map(<[u8]>::to_vec);
            this.refresh()
        })
    }

    /// Recomputes every invalidated hash and returns the document hash, or
    /// `None` when hashing is off.
    pub fn rehash(&mut self) -> Result<Option<u128>> {
        if self.config.hash_kind == HashKind::None {
            return Ok(None);
        }
        self.guarded(|this| {
            let hash = this.rehash_node(NodeKey::ROOT)?;
            this.refresh()?;
            Ok(Some(hash))
        })
    }

    /// Recomputes pending hashes and commits the revision.
    ///
    /// Refused, and the transaction aborted, when an earlier edit failed
    /// halfway.
    pub fn commit(mut self) -> Result<Revision> {
        if let Some(fault) = self.fault.take() {
            self.trx.abort();
            return Err(PalimpsestError::Usage(format!(
                "write transaction aborted by an earlier failure: {fault}"
            )));
        }
        if self.config.hash_kind == HashKind::Structural {
            self.rehash_node(NodeKey::ROOT)?;
        }
        self.trx.commit()
    }

    /// Discards every change.
    pub fn abort(self) {
        self.trx.abort();
    }

    fn insert_structural(&mut self, position: Position, new: NewNode<'_>) -> Result<NodeKey> {
        self.guarded(|this| this.attach_structural(position, new))
    }

    fn attach_structural(&mut self, position: Position, new: NewNode<'_>) -> Result<NodeKey> {
        let anchor = self.current.clone();
        let (parent_key, left, right) = match position {
            Position::FirstChild => {
                if !matches!(anchor.kind(), NodeKind::DocumentRoot | NodeKind::Element) {
                    return Err(PalimpsestError::Usage(format!(
                        "{:?} nodes cannot have children",
                        anchor.kind()
                    )));
                }
                let first = anchor.structure().and_then(|s| s.first_child);
                (anchor.node_key(), None, first)
            }
            Position::RightSibling => {
                if !anchor.kind().is_structural() || anchor.kind() == NodeKind::DocumentRoot {
                    return Err(PalimpsestError::Usage(format!(
                        "{:?} nodes have no siblings",
                        anchor.kind()
                    )));
                }
                let parent = anchor.parent_key().ok_or_else(|| {
                    PalimpsestError::Consistency(format!("node {} has no parent", anchor.node_key()))
                })?;
                let right = anchor.structure().and_then(|s| s.right_sibling);
                (parent, Some(anchor.node_key()), right)
            }
        };
        let parent = self.require(parent_key)?;
        let key = self.trx.new_record_key(PageKind::Document, 0)?;
        let node = NodeDelegate::new(key, Some(parent_key), self.trx.revision());
        let structure = StructDelegate {
            left_sibling: left,
            right_sibling: right,
            ..StructDelegate::default()
        };
        let kind = new.kind();
        let compress = self.config.compress_values_over;
        let created = match new {
            NewNode::Element(name) => {
                let mut delegate = self.intern(kind, name)?;
                delegate.path_node_key = PathSummaryWriter::new(&mut self.trx).get_or_insert(
                    parent_pcr(&parent),
                    kind,
                    name,
                )?;
                DocumentNode::Element(ElementNode {
                    node,
                    structure,
                    name: delegate,
                    attributes: Vec::new(),
                    namespaces: Vec::new(),
                })
            }
            NewNode::Text(value) => DocumentNode::Text(TextNode {
                node,
                structure,
                value: ValueDelegate::new(value, compress),
            }),
            NewNode::Comment(value) => DocumentNode::Comment(CommentNode {
                node,
                structure,
                value: ValueDelegate::new(value, compress),
            }),
            NewNode::Pi(target, content) => DocumentNode::ProcessingInstruction(PiNode {
                node,
                structure,
                name: self.intern(kind, target)?,
                value: ValueDelegate::new(content, compress),
            }),
        };
        self.trx
            .create_entry(key, Record::Node(created), PageKind::Document, 0)?;
        match left {
            Some(left) => self.modify_structure(left)?.right_sibling = Some(key),
            None => self.modify_structure(parent_key)?.first_child = Some(key),
        }
        if let Some(right) = right {
            self.modify_structure(right)?.left_sibling = Some(key);
        }
        self.modify_structure(parent_key)?.child_count += 1;
        self.adjust_descendants(parent_key, 1)?;
        self.finish_insert(key)
    }

    fn finish_insert(&mut self, key: NodeKey) -> Result<NodeKey> {
        self.notify(ChangeType::Insert, key)?;
        self.invalidate_hashes(key)?;
        self.current = self.require(key)?;
        trace!(node = key.0, kind = ?self.current.kind(), "node.insert");
        Ok(key)
    }

    /// Moves every element and attribute below (and including) `element`
    /// to the path classes implied by its new name.
    fn rename_element(&mut self, element: &DocumentNode, name: &QName) -> Result<()> {
        let root = element.node_key();
        let old = *element
            .name()
            .ok_or_else(|| PalimpsestError::Consistency("element without name".into()))?;
        let parent = self.parent_of(element)?;
        let subtree = preorder(&self.trx, root)?;
        for key in &subtree {
            self.notify(ChangeType::Delete, *key)?;
        }

        let renamed = self.intern(NodeKind::Element, name)?;
        self.release_names(NodeKind::Element, &old)?;
        let mut new_pcrs: FxHashMap<NodeKey, Pcr> = FxHashMap::default();
        let mut old_pcrs = Vec::new();
        for key in &subtree {
            let node = self.require(*key)?;
            let Some(delegate) = node.name().copied() else {
                continue;
            };
            let parent_pcr_now = if *key == root {
                parent_pcr(&parent)
            } else {
                node.parent_key()
                    .and_then(|parent| new_pcrs.get(&parent).copied())
                    .ok_or_else(|| {
                        PalimpsestError::Consistency(format!("node {key} escaped its subtree"))
                    })?
            };
            match node.kind() {
                NodeKind::Element | NodeKind::Attribute => {
                    let label = if *key == root {
                        name.clone()
                    } else {
                        resolve_name(&self.trx, node.kind(), &delegate)?
                    };
                    let pcr = PathSummaryWriter::new(&mut self.trx).get_or_insert(
                        parent_pcr_now,
                        node.kind(),
                        &label,
                    )?;
                    new_pcrs.insert(*key, pcr);
                    old_pcrs.push(delegate.path_node_key);
                    let updated = if *key == root {
                        NameDelegate {
                            path_node_key: pcr,
                            ..renamed
                        }
                    } else {
                        NameDelegate {
                            path_node_key: pcr,
                            ..delegate
                        }
                    };
                    self.set_name_delegate(*key, updated)?;
                }
                NodeKind::Namespace => {
                    self.set_name_delegate(
                        *key,
                        NameDelegate {
                            path_node_key: parent_pcr_now,
                            ..delegate
                        },
                    )?;
                }
                _ => {}
            }
        }
        for pcr in old_pcrs.into_iter().rev() {
            PathSummaryWriter::new(&mut self.trx).release(pcr)?;
        }
        for key in &subtree {
            self.notify(ChangeType::Insert, *key)?;
        }
        debug!(node = root.0, nodes = subtree.len(), "node.rename_element");
        Ok(())
    }

    fn rehash_node(&mut self, key: NodeKey) -> Result<u128> {
        let node = self.require(key)?;
        if let Some(hash) = node.hash() {
            return Ok(hash);
        }
        let mut children = Vec::new();
        for child in node.non_structural_children() {
            children.push(self.rehash_node(child)?);
        }
        let mut next = node.structure().and_then(|s| s.first_child);
        while let Some(child) = next {
            children.push(self.rehash_node(child)?);
            next = self.require(child)?.structure().and_then(|s| s.right_sibling);
        }
        let name = match node.name() {
            Some(delegate) => Some(resolve_name(&self.trx, node.kind(), delegate)?),
            None => None,
        };
        let hash = node.compute_hash(&self.config.hasher, name.as_ref(), &children)?;
        self.modify(key)?.delegate_mut().hash = Some(hash);
        Ok(hash)
    }

    /// Clears the hash of `from` and of its ancestors, stopping at the first
    /// ancestor that is already cleared.
    fn invalidate_hashes(&mut self, from: NodeKey) -> Result<()> {
        if self.config.hash_kind == HashKind::None {
            return Ok(());
        }
        let mut next = Some(from);
        while let Some(key) = next {
            let node = self.require(key)?;
            if key != from && node.hash().is_none() {
                break;
            }
            if node.hash().is_some() {
                self.modify(key)?.delegate_mut().hash = None;
            }
            next = node.parent_key();
        }
        Ok(())
    }

    fn notify(&mut self, change: ChangeType, key: NodeKey) -> Result<()> {
        if self.indexes.is_empty() {
            return Ok(());
        }
        let node = self.require(key)?;
        let event = ChangeEvent::for_node(&self.trx, &node)?;
        self.indexes.notify(&mut self.trx, change, &event)
    }

    fn intern(&mut self, kind: NodeKind, name: &QName) -> Result<NameDelegate> {
        let name_kind = kind
            .name_kind()
            .ok_or_else(|| PalimpsestError::Usage(format!("{kind:?} nodes carry no name")))?;
        let names = self.trx.name_page_mut()?;
        Ok(NameDelegate {
            prefix_key: names.set_name(name_kind, name.prefix())?,
            local_name_key: names.set_name(name_kind, name.local_name())?,
            uri_key: names.set_name(NameKind::Namespace, name.uri())?,
            path_node_key: ROOT_PCR,
        })
    }

    fn release_names(&mut self, kind: NodeKind, delegate: &NameDelegate) -> Result<()> {
        let name_kind = kind
            .name_kind()
            .ok_or_else(|| PalimpsestError::Usage(format!("{kind:?} nodes carry no name")))?;
        let names = self.trx.name_page_mut()?;
        names.remove_name(name_kind, delegate.prefix_key)?;
        names.remove_name(name_kind, delegate.local_name_key)?;
        names.remove_name(NameKind::Namespace, delegate.uri_key)
    }

    fn attribute_taken(&self, element: &DocumentNode, name: &QName) -> Result<bool> {
        let Some(element) = element.as_element() else {
            return Ok(false);
        };
        for key in &element.attributes {
            let attribute = self.require(*key)?;
            if let Some(delegate) = attribute.name() {
                if &resolve_name(&self.trx, NodeKind::Attribute, delegate)? == name {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn namespace_taken(
        &self,
        element: &ElementNode,
        name: &QName,
        except: Option<NodeKey>,
    ) -> Result<bool> {
        for key in &element.namespaces {
            if Some(*key) == except {
                continue;
            }
            let namespace = self.require(*key)?;
            if let Some(delegate) = namespace.name() {
                let declared = resolve_name(&self.trx, NodeKind::Namespace, delegate)?;
                if declared.local_name() == name.local_name() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn parent_of(&self, node: &DocumentNode) -> Result<DocumentNode> {
        let parent = node.parent_key().ok_or_else(|| {
            PalimpsestError::Consistency(format!("node {} has no parent", node.node_key()))
        })?;
        self.require(parent)
    }

    fn require(&self, key: NodeKey) -> Result<DocumentNode> {
        load_node(&self.trx, key)?.ok_or(PalimpsestError::NotFound("document node"))
    }

    fn refresh(&mut self) -> Result<()> {
        self.current = self.require(self.current.node_key())?;
        Ok(())
    }

    /// Private copy of node `key`, stamped with the writing revision.
    fn modify(&mut self, key: NodeKey) -> Result<&mut DocumentNode> {
        let revision = self.trx.revision();
        match self
            .trx
            .prepare_entry_for_modification(key, PageKind::Document, 0)?
        {
            Record::Node(node) => {
                node.delegate_mut().revision = revision;
                Ok(node)
            }
            other => Err(PalimpsestError::Consistency(format!(
                "document key {key} holds a {}",
                other.describe()
            ))),
        }
    }

    fn modify_structure(&mut self, key: NodeKey) -> Result<&mut StructDelegate> {
        self.modify(key)?
            .structure_mut()
            .ok_or_else(|| PalimpsestError::Consistency(format!("node {key} is not structural")))
    }

    fn modify_element(&mut self, key: NodeKey) -> Result<&mut ElementNode> {
        self.modify(key)?
            .as_element_mut()
            .ok_or_else(|| PalimpsestError::Consistency(format!("node {key} is not an element")))
    }

    fn set_name_delegate(&mut self, key: NodeKey, delegate: NameDelegate) -> Result<()> {
        *self
            .modify(key)?
            .name_mut()
            .ok_or_else(|| PalimpsestError::Consistency(format!("node {key} has no name")))? =
            delegate;
        Ok(())
    }

    fn adjust_descendants(&mut self, from: NodeKey, delta: i64) -> Result<()> {
        let mut next = Some(from);
        while let Some(key) = next {
            let node = self.modify(key)?;
            next = node.parent_key();
            let structure = node.structure_mut().ok_or_else(|| {
                PalimpsestError::Consistency(format!("ancestor {key} is not structural"))
            })?;
            structure.descendant_count = structure
                .descendant_count
                .checked_add_signed(delta)
                .ok_or_else(|| PalimpsestError::Consistency("descendant count underflow".into()))?;
        }
        Ok(())
    }
}

/// PCR children of `node` hang below: its own for elements, the root's for
/// the document root.
fn parent_pcr(node: &DocumentNode) -> Pcr {
    node.name().map_or(ROOT_PCR, |name| name.path_node_key)
}

fn initialize_document(trx: &mut PageWriteTrx) -> Result<()> {
    PathSummaryWriter::new(trx).initialize()?;
    let key = trx.new_record_key(PageKind::Document, 0)?;
    if key != NodeKey::ROOT {
        return Err(PalimpsestError::Usage("document already initialized".into()));
    }
    let root = DocumentNode::DocumentRoot(DocumentRootNode {
        node: NodeDelegate::new(key, None, trx.revision()),
        structure: StructDelegate::default(),
    });
    trx.create_entry(key, Record::Node(root), PageKind::Document, 0)?;
    debug!(revision = trx.revision(), "node.document.initialized");
    Ok(())
}

impl NodeReader for NodeWriteTrx {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trx::ResourceManager;
    use crate::ResourceOptions;

    fn manager() -> ResourceManager {
        ResourceManager::open(ResourceOptions::in_memory()).unwrap()
    }

    #[test]
    fn inserts_link_siblings_and_counts() -> Result<()> {
        let manager = manager();
        let mut wtx = manager.begin_node_write()?;
        let a = wtx.insert_element_as_first_child(&QName::local("a"))?;
        let b = wtx.insert_element_as_first_child(&QName::local("b"))?;
        let c = wtx.insert_element_as_right_sibling(&QName::local("c"))?;
        assert!(wtx.move_to(a)?);
        assert_eq!(wtx.child_count(), 2);
        assert_eq!(wtx.descendant_count(), 2);
        assert!(wtx.move_to_first_child()?);
        assert_eq!(wtx.node_key(), b);
        assert!(wtx.move_to_right_sibling()?);
        assert_eq!(wtx.node_key(), c);
        assert!(!wtx.move_to_right_sibling()?);
        assert!(wtx.move_to_document_root()?);
        assert_eq!(wtx.descendant_count(), 3);
        Ok(())
    }

    #[test]
    fn remove_moves_to_neighbour_and_fixes_counts() -> Result<()> {
        let manager = manager();
        let mut wtx = manager.begin_node_write()?;
        let root = wtx.insert_element_as_first_child(&QName::local("root"))?;
        let first = wtx.insert_element_as_first_child(&QName::local("x"))?;
        wtx.insert_text_as_first_child(b"inner")?;
        wtx.move_to(first)?;
        let second = wtx.insert_element_as_right_sibling(&QName::local("y"))?;
        wtx.move_to(first)?;
        wtx.remove()?;
        assert_eq!(wtx.node_key(), second);
        assert!(!wtx.move_to_left_sibling()?);
        wtx.move_to(root)?;
        assert_eq!(wtx.child_count(), 1);
        assert_eq!(wtx.descendant_count(), 1);
        wtx.move_to(second)?;
        wtx.remove()?;
        assert_eq!(wtx.node_key(), root);
        assert_eq!(wtx.child_count(), 0);
        Ok(())
    }

    #[test]
    fn path_summary_follows_renames() -> Result<()> {
        let manager = manager();
        let mut wtx = manager.begin_node_write()?;
        let a = wtx.insert_element_as_first_child(&QName::local("a"))?;
        wtx.insert_element_as_first_child(&QName::local("b"))?;
        wtx.insert_attribute(&QName::local("id"), b"1")?;
        let old = wtx.path_summary().get_pcrs_for_paths(&[crate::summary::Path::parse("/a/b/@id")?])?;
        assert_eq!(old.pcrs.len(), 1);

        wtx.move_to(a)?;
        wtx.set_name(&QName::local("z"))?;
        let summary = wtx.path_summary();
        let moved = summary.get_pcrs_for_paths(&[crate::summary::Path::parse("/z/b/@id")?])?;
        let gone = summary.get_pcrs_for_paths(&[crate::summary::Path::parse("/a//*")?])?;
        assert_eq!(moved.pcrs.len(), 1);
        assert!(gone.pcrs.is_empty());
        assert_eq!(summary.children(ROOT_PCR)?.len(), 1);
        Ok(())
    }

    #[test]
    fn duplicate_attribute_is_rejected() -> Result<()> {
        let manager = manager();
        let mut wtx = manager.begin_node_write()?;
        wtx.insert_element_as_first_child(&QName::local("a"))?;
        wtx.insert_attribute(&QName::local("k"), b"1")?;
        wtx.move_to_parent()?;
        assert!(matches!(
            wtx.insert_attribute(&QName::local("k"), b"2"),
            Err(PalimpsestError::Usage(_))
        ));
        Ok(())
    }

    #[test]
    fn text_cannot_take_children() -> Result<()> {
        let manager = manager();
        let mut wtx = manager.begin_node_write()?;
        wtx.insert_element_as_first_child(&QName::local("a"))?;
        wtx.insert_text_as_first_child(b"leaf")?;
        assert!(matches!(
            wtx.insert_element_as_first_child(&QName::local("b")),
            Err(PalimpsestError::Usage(_))
        ));
        wtx.move_to_document_root()?;
        assert!(matches!(wtx.remove(), Err(PalimpsestError::Usage(_))));
        Ok(())
    }
}
