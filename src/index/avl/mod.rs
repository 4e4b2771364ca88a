//! Persistent AVL trees stored as records.
//!
//! Each index owns one record tree. Key 0 holds an [`AvlRoot`] anchor naming
//! the current root node; every other record is an [`AvlRecord`] with
//! explicit parent and child keys and its subtree height. Because nodes are
//! ordinary records they are cloned on first modification like any page
//! content, so every revision keeps its own consistent tree.

mod reader;
mod writer;

pub use reader::{AvlIter, AvlTreeReader, IterDirection};
pub use writer::AvlTreeWriter;

use std::cmp::Ordering;

use crate::node::delegate::{get_key, put_key};
use crate::primitives::bytes::buf::{self, Cursor};
use crate::types::{NodeKey, PalimpsestError, Result};

/// Key of the root anchor inside an index tree.
pub const ANCHOR_KEY: NodeKey = NodeKey(0);

/// Trait implemented by key types stored in an AVL tree.
pub trait KeyCodec: Sized + Ord + Clone {
    /// Encode `key` into `out`.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Trait implemented by value types stored in an AVL tree.
pub trait ValCodec: Sized + Clone {
    /// Encode `value` into `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from `src`.
    fn decode_val(src: &[u8]) -> Result<Self>;

    /// Folds `other` into an existing value for the same key.
    fn merge(&mut self, other: Self);
}

/// Values that are sets of node keys and can shrink to nothing.
pub trait ReferenceSet: ValCodec {
    /// Removes `key`, returning whether it was present.
    fn remove_node_key(&mut self, key: NodeKey) -> bool;

    /// Whether no keys are left.
    fn is_empty(&self) -> bool;
}

/// Search relation between the target key and the returned key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Key equal to the target.
    Equal,
    /// Smallest key greater than the target.
    Greater,
    /// Smallest key greater than or equal to the target.
    GreaterOrEqual,
    /// Largest key lower than the target.
    Lower,
    /// Largest key lower than or equal to the target.
    LowerOrEqual,
}

impl SearchMode {
    /// Whether `candidate` satisfies the mode relative to `target`.
    pub fn accepts<K: Ord>(self, candidate: &K, target: &K) -> bool {
        let ord = candidate.cmp(target);
        match self {
            SearchMode::Equal => ord == Ordering::Equal,
            SearchMode::Greater => ord == Ordering::Greater,
            SearchMode::GreaterOrEqual => ord != Ordering::Less,
            SearchMode::Lower => ord == Ordering::Less,
            SearchMode::LowerOrEqual => ord != Ordering::Greater,
        }
    }
}

/// Whether the writer's cursor moves to the touched node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MoveCursor {
    NoMove,
    ToIndexedNode,
}

/// Root anchor of an index tree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AvlRoot {
    /// Current root node, `None` while the tree is empty.
    pub root: Option<NodeKey>,
}

impl AvlRoot {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        put_key(out, self.root);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            root: get_key(cur)?,
        })
    }
}

/// Stored form of an AVL node: encoded key and value plus links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvlRecord {
    /// Key as written by [`KeyCodec::encode_key`].
    pub key: Vec<u8>,
    /// Value as written by [`ValCodec::encode_val`].
    pub value: Vec<u8>,
    /// Root of the subtree holding smaller keys.
    pub left: Option<NodeKey>,
    /// Root of the subtree holding larger keys.
    pub right: Option<NodeKey>,
    /// Parent node, `None` at the tree root.
    pub parent: Option<NodeKey>,
    /// Height of the subtree rooted here; a leaf has height 1.
    pub height: u8,
    /// Set when the node was modified in the current revision.
    pub changed: bool,
}

impl AvlRecord {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        buf::put_bytes(out, &self.key);
        buf::put_bytes(out, &self.value);
        put_key(out, self.left);
        put_key(out, self.right);
        put_key(out, self.parent);
        out.push(self.height);
        buf::put_bool(out, self.changed);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let key = cur.bytes()?.to_vec();
        let value = cur.bytes()?.to_vec();
        let left = get_key(cur)?;
        let right = get_key(cur)?;
        let parent = get_key(cur)?;
        let height = cur.u8()?;
        let changed = cur.bool()?;
        if height == 0 {
            return Err(PalimpsestError::Consistency("avl node with zero height".into()));
        }
        Ok(Self {
            key,
            value,
            left,
            right,
            parent,
            height,
            changed,
        })
    }
}

/// Decoded AVL node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvlNode<K, V> {
    /// Record key of this node.
    pub node_key: NodeKey,
    /// Decoded key.
    pub key: K,
    /// Decoded value.
    pub value: V,
    /// Left child.
    pub left: Option<NodeKey>,
    /// Right child.
    pub right: Option<NodeKey>,
    /// Parent node.
    pub parent: Option<NodeKey>,
    /// Stored subtree height.
    pub height: u8,
}

impl<K: KeyCodec, V: ValCodec> AvlNode<K, V> {
    pub(crate) fn from_record(node_key: NodeKey, record: &AvlRecord) -> Result<Self> {
        Ok(Self {
            node_key,
            key: K::decode_key(&record.key)?,
            value: V::decode_val(&record.value)?,
            left: record.left,
            right: record.right,
            parent: record.parent,
            height: record.height,
        })
    }
}

impl KeyCodec for u64 {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| PalimpsestError::Consistency("u64 key must be 8 bytes".into()))?;
        Ok(u64::from_be_bytes(arr))
    }
}
