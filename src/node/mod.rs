#![forbid(unsafe_code)]
//! Document nodes and node-level transactions.
//!
//! Every node kind is a plain struct composed of the delegates it needs.
//! [`DocumentNode`] is the closed sum of all kinds; the capability traits
//! ([`StructNode`], [`NameNode`], [`ValueNode`]) expose the delegates a kind
//! carries.

pub mod delegate;
pub mod hash;
mod qname;
mod read;
mod write;

pub use delegate::{NameDelegate, NodeDelegate, StructDelegate, ValueDelegate};
pub use hash::NodeHasher;
pub use qname::QName;
pub use read::{NodeReadTrx, NodeReader};
pub use write::{NodeConfig, NodeWriteTrx};

use crate::page::{NameKind, PageKind, Record, NULL_NAME_KEY};
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::trx::RecordReader;
use crate::types::{NodeKey, PalimpsestError, Result};

/// Kind of a document node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NodeKind {
    DocumentRoot = 0,
    Element = 1,
    Attribute = 2,
    Namespace = 3,
    Text = 4,
    Comment = 5,
    ProcessingInstruction = 6,
}

impl NodeKind {
    /// Whether nodes of this kind take part in sibling/child links.
    pub fn is_structural(self) -> bool {
        !matches!(self, NodeKind::Attribute | NodeKind::Namespace)
    }

    /// Dictionary holding the prefix and local name of named kinds.
    pub(crate) fn name_kind(self) -> Option<NameKind> {
        match self {
            NodeKind::Element => Some(NameKind::Element),
            NodeKind::Attribute => Some(NameKind::Attribute),
            NodeKind::Namespace => Some(NameKind::Namespace),
            NodeKind::ProcessingInstruction => Some(NameKind::ProcessingInstruction),
            NodeKind::DocumentRoot | NodeKind::Text | NodeKind::Comment => None,
        }
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = PalimpsestError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => NodeKind::DocumentRoot,
            1 => NodeKind::Element,
            2 => NodeKind::Attribute,
            3 => NodeKind::Namespace,
            4 => NodeKind::Text,
            5 => NodeKind::Comment,
            6 => NodeKind::ProcessingInstruction,
            other => {
                return Err(PalimpsestError::Consistency(format!(
                    "unknown node kind {other}"
                )))
            }
        })
    }
}

/// Common identity accessors.
pub trait Node {
    /// Identity delegate.
    fn delegate(&self) -> &NodeDelegate;
    /// Mutable identity delegate.
    fn delegate_mut(&mut self) -> &mut NodeDelegate;
    /// Node kind.
    fn kind(&self) -> NodeKind;

    /// Key of the node.
    fn node_key(&self) -> NodeKey {
        self.delegate().node_key
    }
}

/// Nodes linked into the sibling/child structure.
pub trait StructNode: Node {
    fn structure(&self) -> &StructDelegate;
    fn structure_mut(&mut self) -> &mut StructDelegate;
}

/// Nodes carrying a qualified name.
pub trait NameNode: Node {
    fn name(&self) -> &NameDelegate;
    fn name_mut(&mut self) -> &mut NameDelegate;
}

/// Nodes carrying a value.
pub trait ValueNode: Node {
    fn value(&self) -> &ValueDelegate;
    fn value_mut(&mut self) -> &mut ValueDelegate;
}

/// The document root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRootNode {
    pub node: NodeDelegate,
    pub structure: StructDelegate,
}

/// An element with its attribute and namespace keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementNode {
    pub node: NodeDelegate,
    pub structure: StructDelegate,
    pub name: NameDelegate,
    pub attributes: Vec<NodeKey>,
    pub namespaces: Vec<NodeKey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeNode {
    pub node: NodeDelegate,
    pub name: NameDelegate,
    pub value: ValueDelegate,
}

/// Namespace declaration; the prefix is the local name, the URI is the URI key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceNode {
    pub node: NodeDelegate,
    pub name: NameDelegate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextNode {
    pub node: NodeDelegate,
    pub structure: StructDelegate,
    pub value: ValueDelegate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentNode {
    pub node: NodeDelegate,
    pub structure: StructDelegate,
    pub value: ValueDelegate,
}

/// Processing instruction; the target is the local name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PiNode {
    pub node: NodeDelegate,
    pub structure: StructDelegate,
    pub name: NameDelegate,
    pub value: ValueDelegate,
}

macro_rules! impl_node {
    ($ty:ty, $kind:expr) => {
        impl Node for $ty {
            fn delegate(&self) -> &NodeDelegate {
                &self.node
            }
            fn delegate_mut(&mut self) -> &mut NodeDelegate {
                &mut self.node
            }
            fn kind(&self) -> NodeKind {
                $kind
            }
        }
    };
}

macro_rules! impl_struct_node {
    ($ty:ty) => {
        impl StructNode for $ty {
            fn structure(&self) -> &StructDelegate {
                &self.structure
            }
            fn structure_mut(&mut self) -> &mut StructDelegate {
                &mut self.structure
            }
        }
    };
}

macro_rules! impl_name_node {
    ($ty:ty) => {
        impl NameNode for $ty {
            fn name(&self) -> &NameDelegate {
                &self.name
            }
            fn name_mut(&mut self) -> &mut NameDelegate {
                &mut self.name
            }
        }
    };
}

macro_rules! impl_value_node {
    ($ty:ty) => {
        impl ValueNode for $ty {
            fn value(&self) -> &ValueDelegate {
                &self.value
            }
            fn value_mut(&mut self) -> &mut ValueDelegate {
                &mut self.value
            }
        }
    };
}

impl_node!(DocumentRootNode, NodeKind::DocumentRoot);
impl_node!(ElementNode, NodeKind::Element);
impl_node!(AttributeNode, NodeKind::Attribute);
impl_node!(NamespaceNode, NodeKind::Namespace);
impl_node!(TextNode, NodeKind::Text);
impl_node!(CommentNode, NodeKind::Comment);
impl_node!(PiNode, NodeKind::ProcessingInstruction);

impl_struct_node!(DocumentRootNode);
impl_struct_node!(ElementNode);
impl_struct_node!(TextNode);
impl_struct_node!(CommentNode);
impl_struct_node!(PiNode);

impl_name_node!(ElementNode);
impl_name_node!(AttributeNode);
impl_name_node!(NamespaceNode);
impl_name_node!(PiNode);

impl_value_node!(AttributeNode);
impl_value_node!(TextNode);
impl_value_node!(CommentNode);
impl_value_node!(PiNode);

/// Any document node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentNode {
    DocumentRoot(DocumentRootNode),
    Element(ElementNode),
    Attribute(AttributeNode),
    Namespace(NamespaceNode),
    Text(TextNode),
    Comment(CommentNode),
    ProcessingInstruction(PiNode),
}

impl DocumentNode {
    fn as_node(&self) -> &dyn Node {
        match self {
            DocumentNode::DocumentRoot(n) => n,
            DocumentNode::Element(n) => n,
            DocumentNode::Attribute(n) => n,
            DocumentNode::Namespace(n) => n,
            DocumentNode::Text(n) => n,
            DocumentNode::Comment(n) => n,
            DocumentNode::ProcessingInstruction(n) => n,
        }
    }

    fn as_node_mut(&mut self) -> &mut dyn Node {
        match self {
            DocumentNode::DocumentRoot(n) => n,
            DocumentNode::Element(n) => n,
            DocumentNode::Attribute(n) => n,
            DocumentNode::Namespace(n) => n,
            DocumentNode::Text(n) => n,
            DocumentNode::Comment(n) => n,
            DocumentNode::ProcessingInstruction(n) => n,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.as_node().kind()
    }

    pub fn delegate(&self) -> &NodeDelegate {
        self.as_node().delegate()
    }

    pub fn delegate_mut(&mut self) -> &mut NodeDelegate {
        self.as_node_mut().delegate_mut()
    }

    pub fn node_key(&self) -> NodeKey {
        self.delegate().node_key
    }

    pub fn parent_key(&self) -> Option<NodeKey> {
        self.delegate().parent_key
    }

    pub fn hash(&self) -> Option<u128> {
        self.delegate().hash
    }

    /// Structure delegate, if this kind has one.
    pub fn structure(&self) -> Option<&StructDelegate> {
        match self {
            DocumentNode::DocumentRoot(n) => Some(n.structure()),
            DocumentNode::Element(n) => Some(n.structure()),
            DocumentNode::Text(n) => Some(n.structure()),
            DocumentNode::Comment(n) => Some(n.structure()),
            DocumentNode::ProcessingInstruction(n) => Some(n.structure()),
            DocumentNode::Attribute(_) | DocumentNode::Namespace(_) => None,
        }
    }

    pub fn structure_mut(&mut self) -> Option<&mut StructDelegate> {
        match self {
            DocumentNode::DocumentRoot(n) => Some(n.structure_mut()),
            DocumentNode::Element(n) => Some(n.structure_mut()),
            DocumentNode::Text(n) => Some(n.structure_mut()),
            DocumentNode::Comment(n) => Some(n.structure_mut()),
            DocumentNode::ProcessingInstruction(n) => Some(n.structure_mut()),
            DocumentNode::Attribute(_) | DocumentNode::Namespace(_) => None,
        }
    }

    /// Name delegate, if this kind has one.
    pub fn name(&self) -> Option<&NameDelegate> {
        match self {
            DocumentNode::Element(n) => Some(n.name()),
            DocumentNode::Attribute(n) => Some(n.name()),
            DocumentNode::Namespace(n) => Some(n.name()),
            DocumentNode::ProcessingInstruction(n) => Some(n.name()),
            _ => None,
        }
    }

    pub fn name_mut(&mut self) -> Option<&mut NameDelegate> {
        match self {
            DocumentNode::Element(n) => Some(n.name_mut()),
            DocumentNode::Attribute(n) => Some(n.name_mut()),
            DocumentNode::Namespace(n) => Some(n.name_mut()),
            DocumentNode::ProcessingInstruction(n) => Some(n.name_mut()),
            _ => None,
        }
    }

    /// Value delegate, if this kind has one.
    pub fn value(&self) -> Option<&ValueDelegate> {
        match self {
            DocumentNode::Attribute(n) => Some(n.value()),
            DocumentNode::Text(n) => Some(n.value()),
            DocumentNode::Comment(n) => Some(n.value()),
            DocumentNode::ProcessingInstruction(n) => Some(n.value()),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut ValueDelegate> {
        match self {
            DocumentNode::Attribute(n) => Some(n.value_mut()),
            DocumentNode::Text(n) => Some(n.value_mut()),
            DocumentNode::Comment(n) => Some(n.value_mut()),
            DocumentNode::ProcessingInstruction(n) => Some(n.value_mut()),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            DocumentNode::Element(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
        match self {
            DocumentNode::Element(n) => Some(n),
            _ => None,
        }
    }

    /// Keys hashed as children: attributes, namespaces, then structural
    /// children are supplied by the caller in that order.
    pub fn non_structural_children(&self) -> Vec<NodeKey> {
        match self {
            DocumentNode::Element(n) => n
                .attributes
                .iter()
                .chain(n.namespaces.iter())
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Hash of this node given its resolved name and its children's hashes.
    ///
    /// Pure: the result depends only on the arguments and the node's kind
    /// and value.
    pub fn compute_hash(
        &self,
        hasher: &NodeHasher,
        name: Option<&QName>,
        children: &[u128],
    ) -> Result<u128> {
        let mut acc = u128::from(self.kind() as u8) + 1;
        if let Some(name) = name {
            acc = NodeHasher::combine(acc, hasher.hash_name(name));
        }
        if let Some(value) = self.value() {
            acc = NodeHasher::combine(acc, hasher.hash_bytes(&value.raw()?));
        }
        for child in children {
            acc = NodeHasher::combine(acc, *child);
        }
        Ok(acc)
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind() as u8);
        self.delegate().encode(out);
        match self {
            DocumentNode::DocumentRoot(n) => n.structure.encode(out),
            DocumentNode::Element(n) => {
                n.structure.encode(out);
                n.name.encode(out);
                put_keys(out, &n.attributes);
                put_keys(out, &n.namespaces);
            }
            DocumentNode::Attribute(n) => {
                n.name.encode(out);
                n.value.encode(out);
            }
            DocumentNode::Namespace(n) => n.name.encode(out),
            DocumentNode::Text(n) => {
                n.structure.encode(out);
                n.value.encode(out);
            }
            DocumentNode::Comment(n) => {
                n.structure.encode(out);
                n.value.encode(out);
            }
            DocumentNode::ProcessingInstruction(n) => {
                n.structure.encode(out);
                n.name.encode(out);
                n.value.encode(out);
            }
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let kind = NodeKind::try_from(cur.u8()?)?;
        let node = NodeDelegate::decode(cur)?;
        Ok(match kind {
            NodeKind::DocumentRoot => DocumentNode::DocumentRoot(DocumentRootNode {
                node,
                structure: StructDelegate::decode(cur)?,
            }),
            NodeKind::Element => DocumentNode::Element(ElementNode {
                node,
                structure: StructDelegate::decode(cur)?,
                name: NameDelegate::decode(cur)?,
                attributes: get_keys(cur)?,
                namespaces: get_keys(cur)?,
            }),
            NodeKind::Attribute => DocumentNode::Attribute(AttributeNode {
                node,
                name: NameDelegate::decode(cur)?,
                value: ValueDelegate::decode(cur)?,
            }),
            NodeKind::Namespace => DocumentNode::Namespace(NamespaceNode {
                node,
                name: NameDelegate::decode(cur)?,
            }),
            NodeKind::Text => DocumentNode::Text(TextNode {
                node,
                structure: StructDelegate::decode(cur)?,
                value: ValueDelegate::decode(cur)?,
            }),
            NodeKind::Comment => DocumentNode::Comment(CommentNode {
                node,
                structure: StructDelegate::decode(cur)?,
                value: ValueDelegate::decode(cur)?,
            }),
            NodeKind::ProcessingInstruction => DocumentNode::ProcessingInstruction(PiNode {
                node,
                structure: StructDelegate::decode(cur)?,
                name: NameDelegate::decode(cur)?,
                value: ValueDelegate::decode(cur)?,
            }),
        })
    }
}

/// Document node under `key`, `None` if absent.
pub(crate) fn load_node<R: RecordReader + ?Sized>(
    trx: &R,
    key: NodeKey,
) -> Result<Option<DocumentNode>> {
    match trx.record(key, PageKind::Document, 0)? {
        Some(Record::Node(node)) => Ok(Some(node)),
        Some(other) => Err(PalimpsestError::Consistency(format!(
            "document key {key} holds a {}",
            other.describe()
        ))),
        None => Ok(None),
    }
}

/// Keys of the subtree rooted at `root` in document order: each element
/// precedes its attributes, then its namespaces, then its children.
pub(crate) fn preorder<R: RecordReader + ?Sized>(trx: &R, root: NodeKey) -> Result<Vec<NodeKey>> {
    let mut order = Vec::new();
    let mut pending = vec![root];
    while let Some(key) = pending.pop() {
        let node = load_node(trx, key)?.ok_or(PalimpsestError::NotFound("document node"))?;
        order.push(key);
        let mut children = node.non_structural_children();
        let mut next = node.structure().and_then(|structure| structure.first_child);
        while let Some(child) = next {
            children.push(child);
            next = load_node(trx, child)?
                .ok_or(PalimpsestError::NotFound("document node"))?
                .structure()
                .and_then(|structure| structure.right_sibling);
        }
        pending.extend(children.into_iter().rev());
    }
    Ok(order)
}

/// Resolves the name keys of a node of `kind` through the name dictionaries.
/// URIs always live in the namespace dictionary.
pub(crate) fn resolve_name<R: RecordReader + ?Sized>(
    trx: &R,
    kind: NodeKind,
    name: &NameDelegate,
) -> Result<QName> {
    let name_kind = kind
        .name_kind()
        .ok_or_else(|| PalimpsestError::Usage(format!("{kind:?} nodes carry no name")))?;
    let lookup = |kind: NameKind, key: i32| -> Result<String> {
        if key == NULL_NAME_KEY {
            return Ok(String::new());
        }
        trx.name(kind, key)?.ok_or_else(|| {
            PalimpsestError::Consistency(format!("name key {key} missing from {kind:?} dictionary"))
        })
    };
    Ok(QName::new(
        lookup(name_kind, name.prefix_key)?,
        lookup(name_kind, name.local_name_key)?,
        lookup(NameKind::Namespace, name.uri_key)?,
    ))
}

fn put_keys(out: &mut Vec<u8>, keys: &[NodeKey]) {
    var::encode_u64(keys.len() as u64, out);
    for key in keys {
        var::encode_u64(key.0, out);
    }
}

fn get_keys(cur: &mut Cursor<'_>) -> Result<Vec<NodeKey>> {
    let count = cur.varint()?;
    let mut keys = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        keys.push(NodeKey(cur.varint()?));
    }
    Ok(keys)
}
