use std::marker::PhantomData;

use crate::page::{PageKind, Record};
use crate::trx::RecordReader;
use crate::types::{NodeKey, PalimpsestError, Result};

use super::{AvlNode, AvlRecord, KeyCodec, SearchMode, ValCodec, ANCHOR_KEY};

/// Order in which an [`AvlIter`] walks the tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IterDirection {
    Ascending,
    Descending,
}

/// Read access to one AVL tree of a revision.
pub struct AvlTreeReader<'a, R: RecordReader + ?Sized, K, V> {
    trx: &'a R,
    kind: PageKind,
    index: u32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<R: RecordReader + ?Sized, K, V> Clone for AvlTreeReader<'_, R, K, V> {
    fn clone(&self) -> Self {
        Self {
            trx: self.trx,
            kind: self.kind,
            index: self.index,
            _marker: PhantomData,
        }
    }
}

impl<'a, R, K, V> AvlTreeReader<'a, R, K, V>
where
    R: RecordReader + ?Sized,
    K: KeyCodec,
    V: ValCodec,
{
    /// Reader over the tree of index `index`.
    pub fn new(trx: &'a R, kind: PageKind, index: u32) -> Self {
        Self {
            trx,
            kind,
            index,
            _marker: PhantomData,
        }
    }

    /// Current root node key.
    pub fn root_key(&self) -> Result<Option<NodeKey>> {
        match self.trx.record(ANCHOR_KEY, self.kind, self.index)? {
            Some(Record::AvlRoot(anchor)) => Ok(anchor.root),
            Some(other) => Err(PalimpsestError::Consistency(format!(
                "index anchor holds a {}",
                other.describe()
            ))),
            None => Err(PalimpsestError::Consistency(format!(
                "index {} has no root anchor",
                self.index
            ))),
        }
    }

    pub(crate) fn raw(&self, key: NodeKey) -> Result<AvlRecord> {
        match self.trx.record(key, self.kind, self.index)? {
            Some(Record::Avl(record)) => Ok(record),
            Some(other) => Err(PalimpsestError::Consistency(format!(
                "avl key {key} holds a {}",
                other.describe()
            ))),
            None => Err(PalimpsestError::Consistency(format!(
                "avl node {key} referenced but missing"
            ))),
        }
    }

    /// Decoded node under record key `key`.
    pub fn node(&self, key: NodeKey) -> Result<AvlNode<K, V>> {
        AvlNode::from_record(key, &self.raw(key)?)
    }

    /// Node whose key satisfies `mode` relative to `target` and lies closest to it.
    pub fn find(&self, target: &K, mode: SearchMode) -> Result<Option<AvlNode<K, V>>> {
        let mut current = self.root_key()?;
        let mut candidate = None;
        while let Some(key) = current {
            let record = self.raw(key)?;
            let node_key = K::decode_key(&record.key)?;
            match mode {
                SearchMode::Equal => match node_key.cmp(target) {
                    std::cmp::Ordering::Equal => return AvlNode::from_record(key, &record).map(Some),
                    std::cmp::Ordering::Less => current = record.right,
                    std::cmp::Ordering::Greater => current = record.left,
                },
                SearchMode::Greater | SearchMode::GreaterOrEqual => {
                    if mode.accepts(&node_key, target) {
                        current = record.left;
                        candidate = Some((key, record));
                    } else {
                        current = record.right;
                    }
                }
                SearchMode::Lower | SearchMode::LowerOrEqual => {
                    if mode.accepts(&node_key, target) {
                        current = record.right;
                        candidate = Some((key, record));
                    } else {
                        current = record.left;
                    }
                }
            }
        }
        candidate
            .map(|(key, record)| AvlNode::from_record(key, &record))
            .transpose()
    }

    /// Value of the node found by [`AvlTreeReader::find`].
    pub fn get(&self, target: &K, mode: SearchMode) -> Result<Option<V>> {
        Ok(self.find(target, mode)?.map(|node| node.value))
    }

    /// Every node in ascending key order.
    pub fn iter(&self) -> Result<AvlIter<'a, R, K, V>> {
        let start = match self.root_key()? {
            Some(root) => Some(self.extreme(root, IterDirection::Ascending)?),
            None => None,
        };
        Ok(AvlIter::new(self.clone(), start, IterDirection::Ascending))
    }

    /// Walks from the node found by `find(target, mode)`: ascending for
    /// `Greater*`, descending for `Lower*`, and only that node for `Equal`.
    pub fn range(&self, target: &K, mode: SearchMode) -> Result<AvlIter<'a, R, K, V>> {
        let start = self.find(target, mode)?.map(|node| node.node_key);
        let iter = match mode {
            SearchMode::Equal => {
                let mut iter = AvlIter::new(self.clone(), start, IterDirection::Ascending);
                iter.single = true;
                iter
            }
            SearchMode::Greater | SearchMode::GreaterOrEqual => {
                AvlIter::new(self.clone(), start, IterDirection::Ascending)
            }
            SearchMode::Lower | SearchMode::LowerOrEqual => {
                AvlIter::new(self.clone(), start, IterDirection::Descending)
            }
        };
        Ok(iter)
    }

    /// Leftmost (ascending) or rightmost (descending) node below `from`.
    fn extreme(&self, from: NodeKey, direction: IterDirection) -> Result<NodeKey> {
        let mut current = from;
        loop {
            let record = self.raw(current)?;
            let next = match direction {
                IterDirection::Ascending => record.left,
                IterDirection::Descending => record.right,
            };
            match next {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
    }

    /// In-order neighbour of `node` in `direction`.
    fn step(&self, node: &AvlNode<K, V>, direction: IterDirection) -> Result<Option<NodeKey>> {
        let (down, back) = match direction {
            IterDirection::Ascending => (node.right, IterDirection::Ascending),
            IterDirection::Descending => (node.left, IterDirection::Descending),
        };
        if let Some(child) = down {
            return self.extreme(child, back).map(Some);
        }
        let mut child = node.node_key;
        let mut parent = node.parent;
        while let Some(key) = parent {
            let record = self.raw(key)?;
            let came_from_near_side = match direction {
                IterDirection::Ascending => record.left == Some(child),
                IterDirection::Descending => record.right == Some(child),
            };
            if came_from_near_side {
                return Ok(Some(key));
            }
            child = key;
            parent = record.parent;
        }
        Ok(None)
    }

    /// Number of nodes.
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for node in self.iter()? {
            node?;
            count += 1;
        }
        Ok(count)
    }

    /// Whether the tree holds no nodes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_key()?.is_none())
    }

    /// Checks ordering, parent links, stored heights and balance of the whole
    /// tree, returning the node count.
    pub fn verify(&self) -> Result<usize> {
        match self.root_key()? {
            Some(root) => Ok(self.verify_subtree(root, None, None, None)?.0),
            None => Ok(0),
        }
    }

    fn verify_subtree(
        &self,
        key: NodeKey,
        parent: Option<NodeKey>,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<(usize, u8)> {
        let node = self.node(key)?;
        let fail = |what: &str| {
            PalimpsestError::Consistency(format!("avl node {key} violates {what}"))
        };
        if node.parent != parent {
            return Err(fail("parent link"));
        }
        if lower.map_or(false, |bound| node.key <= *bound)
            || upper.map_or(false, |bound| node.key >= *bound)
        {
            return Err(fail("key order"));
        }
        let (left_count, left_height) = match node.left {
            Some(left) => self.verify_subtree(left, Some(key), lower, Some(&node.key))?,
            None => (0, 0),
        };
        let (right_count, right_height) = match node.right {
            Some(right) => self.verify_subtree(right, Some(key), Some(&node.key), upper)?,
            None => (0, 0),
        };
        if node.height != 1 + left_height.max(right_height) {
            return Err(fail("stored height"));
        }
        if left_height.abs_diff(right_height) > 1 {
            return Err(fail("balance"));
        }
        Ok((left_count + right_count + 1, node.height))
    }
}

/// Lazy in-order traversal following parent links.
pub struct AvlIter<'a, R: RecordReader + ?Sized, K, V> {
    reader: AvlTreeReader<'a, R, K, V>,
    next: Option<NodeKey>,
    direction: IterDirection,
    single: bool,
    pending: Option<PalimpsestError>,
}

impl<'a, R, K, V> AvlIter<'a, R, K, V>
where
    R: RecordReader + ?Sized,
    K: KeyCodec,
    V: ValCodec,
{
    fn new(
        reader: AvlTreeReader<'a, R, K, V>,
        start: Option<NodeKey>,
        direction: IterDirection,
    ) -> Self {
        Self {
            reader,
            next: start,
            direction,
            single: false,
            pending: None,
        }
    }
}

impl<R, K, V> Iterator for AvlIter<'_, R, K, V>
where
    R: RecordReader + ?Sized,
    K: KeyCodec,
    V: ValCodec,
{
    type Item = Result<AvlNode<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }
        let key = self.next.take()?;
        let node = match self.reader.node(key) {
            Ok(node) => node,
            Err(err) => return Some(Err(err)),
        };
        if !self.single {
            match self.reader.step(&node, self.direction) {
                Ok(next) => self.next = next,
                Err(err) => self.pending = Some(err),
            }
        }
        Some(Ok(node))
    }
}
