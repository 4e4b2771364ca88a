use std::collections::BTreeSet;

use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::types::{NodeKey, Result};

use super::avl::{ReferenceSet, ValCodec};

/// Set of document node keys stored as an index value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeReferences {
    keys: BTreeSet<NodeKey>,
}

impl NodeReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding just `key`.
    pub fn single(key: NodeKey) -> Self {
        let mut keys = BTreeSet::new();
        keys.insert(key);
        Self { keys }
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.keys.iter().copied()
    }

    pub fn insert(&mut self, key: NodeKey) -> bool {
        self.keys.insert(key)
    }
}

impl FromIterator<NodeKey> for NodeReferences {
    fn from_iter<I: IntoIterator<Item = NodeKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl ValCodec for NodeReferences {
    // Ascending keys are delta-encoded.
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        var::encode_u64(value.keys.len() as u64, out);
        let mut previous = 0;
        for key in &value.keys {
            var::encode_u64(key.0 - previous, out);
            previous = key.0;
        }
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(src);
        let count = cur.varint()?;
        let mut keys = BTreeSet::new();
        let mut previous = 0u64;
        for _ in 0..count {
            previous = previous.wrapping_add(cur.varint()?);
            keys.insert(NodeKey(previous));
        }
        cur.finish()?;
        Ok(Self { keys })
    }

    fn merge(&mut self, other: Self) {
        self.keys.extend(other.keys);
    }
}

impl ReferenceSet for NodeReferences {
    fn remove_node_key(&mut self, key: NodeKey) -> bool {
        self.keys.remove(&key)
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
