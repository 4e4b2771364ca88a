use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::types::{PalimpsestError, Result};

use super::reference::PageReference;

/// log2 of the number of references per indirect page.
pub const INDIRECT_FANOUT_EXP: u32 = 7;
/// Number of references per indirect page.
pub const INDIRECT_FANOUT: usize = 1 << INDIRECT_FANOUT_EXP;
/// Indirect levels between a record tree root and its record pages.
pub const INDIRECT_LEVELS: u32 = 4;
/// Largest record page key addressable by a record tree.
pub const MAX_RECORD_PAGE_KEY: u64 = (1u64 << (INDIRECT_FANOUT_EXP * INDIRECT_LEVELS)) - 1;

/// Fixed-fanout array of page references, one level of a record trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectPage {
    refs: Vec<PageReference>,
}

impl Default for IndirectPage {
    fn default() -> Self {
        Self::new()
    }
}

impl IndirectPage {
    /// Creates a page whose references are all null.
    pub fn new() -> Self {
        Self {
            refs: vec![PageReference::default(); INDIRECT_FANOUT],
        }
    }

    /// Reference stored at `offset`.
    pub fn get(&self, offset: usize) -> PageReference {
        self.refs.get(offset).copied().unwrap_or_default()
    }

    /// Replaces the reference at `offset`.
    pub fn set(&mut self, offset: usize, reference: PageReference) -> Result<()> {
        let slot = self.refs.get_mut(offset).ok_or_else(|| {
            PalimpsestError::Consistency(format!("indirect offset {offset} out of range"))
        })?;
        *slot = reference;
        Ok(())
    }

    pub(crate) fn references_mut(&mut self) -> impl Iterator<Item = &mut PageReference> {
        self.refs.iter_mut()
    }

    /// Number of non-null references.
    pub fn populated(&self) -> usize {
        self.refs.iter().filter(|r| !r.is_null()).count()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        var::encode_u64(self.populated() as u64, out);
        for (offset, reference) in self.refs.iter().enumerate() {
            if reference.is_null() {
                continue;
            }
            var::encode_u64(offset as u64, out);
            reference.encode(out)?;
        }
        Ok(())
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let mut page = Self::new();
        let count = cur.varint()?;
        for _ in 0..count {
            let offset = cur.varint()? as usize;
            let reference = PageReference::decode(cur)?;
            page.set(offset, reference)?;
        }
        Ok(page)
    }
}

/// Offset inside the indirect page at `level` (0 is the tree root) on the
/// path to `record_page_key`.
pub fn level_offset(record_page_key: u64, level: u32) -> usize {
    let shift = INDIRECT_FANOUT_EXP * (INDIRECT_LEVELS - 1 - level);
    ((record_page_key >> shift) & (INDIRECT_FANOUT as u64 - 1)) as usize
}
