//! Plain-data building blocks shared by node kinds.

use std::borrow::Cow;

use crate::primitives::bytes::buf::{self, Cursor};
use crate::primitives::bytes::var;
use crate::types::{NodeKey, PalimpsestError, Pcr, Result, Revision};

/// Identity, parent link and hash of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDelegate {
    /// Key of this node in its record tree.
    pub node_key: NodeKey,
    /// Parent node, `None` for roots.
    pub parent_key: Option<NodeKey>,
    /// Revision that last modified the node.
    pub revision: Revision,
    /// Structural hash, `None` while invalidated or when hashing is off.
    pub hash: Option<u128>,
    /// Dewey order label, stored opaquely.
    pub order_label: Option<Vec<u8>>,
}

impl NodeDelegate {
    /// Identity of a freshly created node.
    pub fn new(node_key: NodeKey, parent_key: Option<NodeKey>, revision: Revision) -> Self {
        Self {
            node_key,
            parent_key,
            revision,
            hash: None,
            order_label: None,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        var::encode_u64(self.node_key.0, out);
        put_key(out, self.parent_key);
        var::encode_u64(u64::from(self.revision), out);
        match self.hash {
            Some(hash) => {
                out.push(1);
                out.extend_from_slice(&hash.to_be_bytes());
            }
            None => out.push(0),
        }
        match &self.order_label {
            Some(label) => {
                out.push(1);
                buf::put_bytes(out, label);
            }
            None => out.push(0),
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let node_key = NodeKey(cur.varint()?);
        let parent_key = get_key(cur)?;
        let revision = Revision::try_from(cur.varint()?)
            .map_err(|_| PalimpsestError::Consistency("revision out of range".into()))?;
        let hash = if cur.bool()? { Some(cur.u128_be()?) } else { None };
        let order_label = if cur.bool()? {
            Some(cur.bytes()?.to_vec())
        } else {
            None
        };
        Ok(Self {
            node_key,
            parent_key,
            revision,
            hash,
            order_label,
        })
    }
}

/// Sibling and child links of a node that can have children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructDelegate {
    /// First child.
    pub first_child: Option<NodeKey>,
    /// Previous sibling.
    pub left_sibling: Option<NodeKey>,
    /// Next sibling.
    pub right_sibling: Option<NodeKey>,
    /// Number of children.
    pub child_count: u64,
    /// Number of structural descendants.
    pub descendant_count: u64,
}

impl StructDelegate {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        put_key(out, self.first_child);
        put_key(out, self.left_sibling);
        put_key(out, self.right_sibling);
        var::encode_u64(self.child_count, out);
        var::encode_u64(self.descendant_count, out);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            first_child: get_key(cur)?,
            left_sibling: get_key(cur)?,
            right_sibling: get_key(cur)?,
            child_count: cur.varint()?,
            descendant_count: cur.varint()?,
        })
    }
}

/// Name dictionary keys and path class of a named node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NameDelegate {
    /// Prefix key, [`crate::page::NULL_NAME_KEY`] when unprefixed.
    pub prefix_key: i32,
    /// Local name key.
    pub local_name_key: i32,
    /// Namespace URI key, [`crate::page::NULL_NAME_KEY`] without namespace.
    pub uri_key: i32,
    /// Path summary node of this node's label path.
    pub path_node_key: Pcr,
}

impl NameDelegate {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        var::encode_i64(i64::from(self.prefix_key), out);
        var::encode_i64(i64::from(self.local_name_key), out);
        var::encode_i64(i64::from(self.uri_key), out);
        var::encode_u64(self.path_node_key, out);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            prefix_key: get_i32(cur)?,
            local_name_key: get_i32(cur)?,
            uri_key: get_i32(cur)?,
            path_node_key: cur.varint()?,
        })
    }
}

/// Value bytes of a node, optionally snappy-compressed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueDelegate {
    stored: Vec<u8>,
    compressed: bool,
}

impl ValueDelegate {
    /// Wraps `raw`, compressing it when longer than `compress_over` bytes and
    /// compression actually shrinks it.
    pub fn new(raw: &[u8], compress_over: Option<usize>) -> Self {
        if let Some(threshold) = compress_over {
            if raw.len() > threshold {
                if let Ok(packed) = snap::raw::Encoder::new().compress_vec(raw) {
                    if packed.len() < raw.len() {
                        return Self {
                            stored: packed,
                            compressed: true,
                        };
                    }
                }
            }
        }
        Self {
            stored: raw.to_vec(),
            compressed: false,
        }
    }

    /// Whether the stored bytes are compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Bytes as stored in the record.
    pub fn stored(&self) -> &[u8] {
        &self.stored
    }

    /// Uncompressed value bytes.
    pub fn raw(&self) -> Result<Cow<'_, [u8]>> {
        if !self.compressed {
            return Ok(Cow::Borrowed(&self.stored));
        }
        snap::raw::Decoder::new()
            .decompress_vec(&self.stored)
            .map(Cow::Owned)
            .map_err(|err| PalimpsestError::Consistency(format!("corrupt compressed value: {err}")))
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        buf::put_bool(out, self.compressed);
        buf::put_bytes(out, &self.stored);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let compressed = cur.bool()?;
        let stored = cur.bytes()?.to_vec();
        Ok(Self { stored, compressed })
    }
}

pub(crate) fn put_key(out: &mut Vec<u8>, key: Option<NodeKey>) {
    match key {
        Some(key) => {
            out.push(1);
            var::encode_u64(key.0, out);
        }
        None => out.push(0),
    }
}

pub(crate) fn get_key(cur: &mut Cursor<'_>) -> Result<Option<NodeKey>> {
    if cur.bool()? {
        Ok(Some(NodeKey(cur.varint()?)))
    } else {
        Ok(None)
    }
}

fn get_i32(cur: &mut Cursor<'_>) -> Result<i32> {
    i32::try_from(cur.varint_i64()?)
        .map_err(|_| PalimpsestError::Consistency("name key out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_only_when_it_pays() {
        let long = vec![b'a'; 512];
        let value = ValueDelegate::new(&long, Some(64));
        assert!(value.is_compressed());
        assert!(value.stored().len() < long.len());
        assert_eq!(value.raw().unwrap().as_ref(), long.as_slice());

        let short = ValueDelegate::new(b"tiny", Some(64));
        assert!(!short.is_compressed());
        let off = ValueDelegate::new(&long, None);
        assert!(!off.is_compressed());
    }

    #[test]
    fn node_delegate_keeps_optional_fields() {
        let mut delegate = NodeDelegate::new(NodeKey(7), Some(NodeKey(1)), 3);
        delegate.hash = Some(u128::MAX - 5);
        delegate.order_label = Some(vec![1, 3, 5]);
        let mut out = Vec::new();
        delegate.encode(&mut out);
        let mut cur = Cursor::new(&out);
        assert_eq!(NodeDelegate::decode(&mut cur).unwrap(), delegate);
        cur.finish().unwrap();
    }
}
