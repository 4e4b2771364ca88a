use std::marker::PhantomData;

use tracing::trace;

use crate::page::{PageKind, Record};
use crate::trx::PageWriteTrx;
use crate::types::{NodeKey, PalimpsestError, Result};

use super::{
    AvlRecord, AvlRoot, AvlTreeReader, KeyCodec, MoveCursor, ReferenceSet, SearchMode,
    ValCodec, ANCHOR_KEY,
};

/// Mutating access to one AVL tree inside the write transaction.
///
/// Rotations only rewrite the parent and child keys of the nodes involved;
/// each touched node is made private to the transaction on first touch.
pub struct AvlTreeWriter<'a, K, V> {
    trx: &'a mut PageWriteTrx,
    kind: PageKind,
    index: u32,
    cursor: Option<NodeKey>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: KeyCodec, V: ValCodec> AvlTreeWriter<'a, K, V> {
    /// Writer over the existing tree of index `index`.
    pub fn new(trx: &'a mut PageWriteTrx, kind: PageKind, index: u32) -> Self {
        Self {
            trx,
            kind,
            index,
            cursor: None,
            _marker: PhantomData,
        }
    }

    /// Writes the root anchor of a freshly registered index tree.
    pub fn create(trx: &mut PageWriteTrx, kind: PageKind, index: u32) -> Result<()> {
        let anchor = trx.new_record_key(kind, index)?;
        if anchor != ANCHOR_KEY {
            return Err(PalimpsestError::Usage(format!(
                "index tree {index} already initialized"
            )));
        }
        trx.create_entry(anchor, Record::AvlRoot(AvlRoot::default()), kind, index)?;
        Ok(())
    }

    /// Read view over the in-flight tree.
    pub fn reader(&self) -> AvlTreeReader<'_, PageWriteTrx, K, V> {
        AvlTreeReader::new(&*self.trx, self.kind, self.index)
    }

    /// Node the cursor was last moved to.
    pub fn cursor(&self) -> Option<NodeKey> {
        self.cursor
    }

    /// Looks up a value in the in-flight tree.
    pub fn get(&self, target: &K, mode: SearchMode) -> Result<Option<V>> {
        self.reader().get(target, mode)
    }

    /// Inserts `value` under `key`, merging into the existing value when the
    /// key is present. Returns the value now stored.
    pub fn index(&mut self, key: K, value: V, move_cursor: MoveCursor) -> Result<V> {
        let Some(mut current) = self.reader().root_key()? else {
            let node_key = self.insert_node(&key, &value, None)?;
            self.set_root(Some(node_key))?;
            self.move_cursor(node_key, move_cursor);
            return Ok(value);
        };
        let attach_left = loop {
            let record = self.reader().raw(current)?;
            let existing = K::decode_key(&record.key)?;
            match key.cmp(&existing) {
                std::cmp::Ordering::Equal => {
                    let mut merged = V::decode_val(&record.value)?;
                    merged.merge(value);
                    let mut encoded = Vec::new();
                    V::encode_val(&merged, &mut encoded);
                    self.modify(current)?.value = encoded;
                    self.move_cursor(current, move_cursor);
                    return Ok(merged);
                }
                std::cmp::Ordering::Less => match record.left {
                    Some(left) => current = left,
                    None => break true,
                },
                std::cmp::Ordering::Greater => match record.right {
                    Some(right) => current = right,
                    None => break false,
                },
            }
        };
        let node_key = self.insert_node(&key, &value, Some(current))?;
        {
            let parent = self.modify(current)?;
            if attach_left {
                parent.left = Some(node_key);
            } else {
                parent.right = Some(node_key);
            }
        }
        self.rebalance_from(Some(current))?;
        self.move_cursor(node_key, move_cursor);
        trace!(index = self.index, node = node_key.0, "avl.insert");
        Ok(value)
    }

    fn move_cursor(&mut self, key: NodeKey, move_cursor: MoveCursor) {
        if move_cursor == MoveCursor::ToIndexedNode {
            self.cursor = Some(key);
        }
    }

    fn insert_node(&mut self, key: &K, value: &V, parent: Option<NodeKey>) -> Result<NodeKey> {
        let mut encoded_key = Vec::new();
        K::encode_key(key, &mut encoded_key);
        let mut encoded_value = Vec::new();
        V::encode_val(value, &mut encoded_value);
        let node_key = self.trx.new_record_key(self.kind, self.index)?;
        let record = AvlRecord {
            key: encoded_key,
            value: encoded_value,
            left: None,
            right: None,
            parent,
            height: 1,
            changed: true,
        };
        self.trx
            .create_entry(node_key, Record::Avl(record), self.kind, self.index)?;
        Ok(node_key)
    }

    fn modify(&mut self, key: NodeKey) -> Result<&mut AvlRecord> {
        match self
            .trx
            .prepare_entry_for_modification(key, self.kind, self.index)?
        {
            Record::Avl(record) => {
                record.changed = true;
                Ok(record)
            }
            other => Err(PalimpsestError::Consistency(format!(
                "avl key {key} holds a {}",
                other.describe()
            ))),
        }
    }

    fn set_root(&mut self, root: Option<NodeKey>) -> Result<()> {
        match self
            .trx
            .prepare_entry_for_modification(ANCHOR_KEY, self.kind, self.index)?
        {
            Record::AvlRoot(anchor) => {
                anchor.root = root;
                Ok(())
            }
            other => Err(PalimpsestError::Consistency(format!(
                "index anchor holds a {}",
                other.describe()
            ))),
        }
    }

    fn height(&self, key: Option<NodeKey>) -> Result<u8> {
        match key {
            Some(key) => Ok(self.reader().raw(key)?.height),
            None => Ok(0),
        }
    }

    /// Recomputes the stored height of `key`, returning whether it changed.
    fn update_height(&mut self, key: NodeKey) -> Result<bool> {
        let record = self.reader().raw(key)?;
        let height = 1 + self.height(record.left)?.max(self.height(record.right)?);
        if height == record.height {
            return Ok(false);
        }
        self.modify(key)?.height = height;
        Ok(true)
    }

    /// Points `parent`'s link to `old` at `new`, or the root anchor when
    /// `parent` is `None`.
    fn replace_child(
        &mut self,
        parent: Option<NodeKey>,
        old: NodeKey,
        new: Option<NodeKey>,
    ) -> Result<()> {
        let Some(parent) = parent else {
            return self.set_root(new);
        };
        let record = self.modify(parent)?;
        if record.left == Some(old) {
            record.left = new;
        } else if record.right == Some(old) {
            record.right = new;
        } else {
            return Err(PalimpsestError::Consistency(format!(
                "avl node {parent} is not the parent of {old}"
            )));
        }
        Ok(())
    }

    fn rotate_left(&mut self, x: NodeKey) -> Result<NodeKey> {
        let x_record = self.reader().raw(x)?;
        let y = x_record
            .right
            .ok_or_else(|| PalimpsestError::Consistency(format!("rotate left at {x} without right child")))?;
        let inner = self.reader().raw(y)?.left;
        let parent = x_record.parent;
        {
            let x_mut = self.modify(x)?;
            x_mut.right = inner;
            x_mut.parent = Some(y);
        }
        if let Some(inner) = inner {
            self.modify(inner)?.parent = Some(x);
        }
        {
            let y_mut = self.modify(y)?;
            y_mut.left = Some(x);
            y_mut.parent = parent;
        }
        self.replace_child(parent, x, Some(y))?;
        self.update_height(x)?;
        self.update_height(y)?;
        Ok(y)
    }

    fn rotate_right(&mut self, x: NodeKey) -> Result<NodeKey> {
        let x_record = self.reader().raw(x)?;
        let y = x_record
            .left
            .ok_or_else(|| PalimpsestError::Consistency(format!("rotate right at {x} without left child")))?;
        let inner = self.reader().raw(y)?.right;
        let parent = x_record.parent;
        {
            let x_mut = self.modify(x)?;
            x_mut.left = inner;
            x_mut.parent = Some(y);
        }
        if let Some(inner) = inner {
            self.modify(inner)?.parent = Some(x);
        }
        {
            let y_mut = self.modify(y)?;
            y_mut.right = Some(x);
            y_mut.parent = parent;
        }
        self.replace_child(parent, x, Some(y))?;
        self.update_height(x)?;
        self.update_height(y)?;
        Ok(y)
    }

    /// Restores heights and balance from `start` up to the root. Stops early
    /// once a subtree keeps its height without rotating.
    fn rebalance_from(&mut self, start: Option<NodeKey>) -> Result<()> {
        let mut next = start;
        while let Some(key) = next {
            let record = self.reader().raw(key)?;
            let left_height = i16::from(self.height(record.left)?);
            let right_height = i16::from(self.height(record.right)?);
            let balance = left_height - right_height;
            let subtree_root = if balance > 1 {
                let left = record
                    .left
                    .ok_or_else(|| PalimpsestError::Consistency("left-heavy node without left child".into()))?;
                let left_record = self.reader().raw(left)?;
                if self.height(left_record.left)? < self.height(left_record.right)? {
                    self.rotate_left(left)?;
                }
                self.rotate_right(key)?
            } else if balance < -1 {
                let right = record
                    .right
                    .ok_or_else(|| PalimpsestError::Consistency("right-heavy node without right child".into()))?;
                let right_record = self.reader().raw(right)?;
                if self.height(right_record.right)? < self.height(right_record.left)? {
                    self.rotate_right(right)?;
                }
                self.rotate_left(key)?
            } else {
                if !self.update_height(key)? {
                    return Ok(());
                }
                key
            };
            next = self.reader().raw(subtree_root)?.parent;
        }
        Ok(())
    }

    /// Unlinks node `key` from the tree and deletes its record.
    fn delete_node(&mut self, key: NodeKey) -> Result<()> {
        let record = self.reader().raw(key)?;
        let (removed, child, parent) = match (record.left, record.right) {
            (Some(_), Some(right)) => {
                let mut successor = right;
                loop {
                    match self.reader().raw(successor)?.left {
                        Some(left) => successor = left,
                        None => break,
                    }
                }
                let successor_record = self.reader().raw(successor)?;
                {
                    let target = self.modify(key)?;
                    target.key = successor_record.key.clone();
                    target.value = successor_record.value.clone();
                }
                (successor, successor_record.right, successor_record.parent)
            }
            (left, right) => (key, left.or(right), record.parent),
        };
        if let Some(child) = child {
            self.modify(child)?.parent = parent;
        }
        self.replace_child(parent, removed, child)?;
        self.trx.remove_entry(removed, self.kind, self.index)?;
        if self.cursor == Some(removed) {
            self.cursor = None;
        }
        self.rebalance_from(parent)
    }
}

impl<K: KeyCodec, V: ReferenceSet> AvlTreeWriter<'_, K, V> {
    /// Removes `node_key` from the reference set stored under `key`.
    ///
    /// Returns `Ok(false)` when the set does not contain `node_key`. Removing
    /// from a key that is not indexed is a usage error. When the set becomes
    /// empty the AVL node is deleted and the tree rebalanced.
    pub fn remove(&mut self, key: &K, node_key: NodeKey) -> Result<bool> {
        let Some(found) = self.reader().find(key, SearchMode::Equal)? else {
            return Err(PalimpsestError::Usage(format!(
                "index {} holds no entry for the removed key",
                self.index
            )));
        };
        let mut references = found.value;
        if !references.remove_node_key(node_key) {
            return Ok(false);
        }
        if references.is_empty() {
            self.delete_node(found.node_key)?;
            trace!(index = self.index, node = found.node_key.0, "avl.delete");
        } else {
            let mut encoded = Vec::new();
            V::encode_val(&references, &mut encoded);
            self.modify(found.node_key)?.value = encoded;
        }
        Ok(true)
    }
}

impl<K, V> AvlTreeWriter<'_, K, V> {
    /// Index number this writer maintains.
    pub fn index_number(&self) -> u32 {
        self.index
    }
}
