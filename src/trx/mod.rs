#![forbid(unsafe_code)]
//! Page-level transactions over the page graph.
//!
//! [`PageReadTrx`] is pinned to one committed revision. [`PageWriteTrx`]
//! builds the next revision in a private page log: the first touch of a
//! committed page clones it, together with every indirect page between it
//! and the record tree root, and commit writes the log bottom-up before the
//! uber page.

mod read;
mod resource;
mod write;

pub use read::PageReadTrx;
pub use resource::ResourceManager;
pub use write::PageWriteTrx;

use std::ops::Deref;
use std::sync::Arc;

use crate::index::IndexDef;
use crate::page::{
    level_offset, record_page_key, NameKind, Page, PageKind, PageReference, Record,
    RevisionRootPage, INDIRECT_LEVELS, MAX_RECORD_PAGE_KEY,
};
use crate::types::{NodeKey, Result, Revision};

/// Read access to the records of one revision.
///
/// Implemented by both transaction kinds so tree readers work the same on
/// committed and on in-flight state.
pub trait RecordReader {
    /// Revision this transaction reads (or writes).
    fn revision(&self) -> Revision;

    /// Root page the transaction resolves records through.
    fn root_page(&self) -> &RevisionRootPage;

    /// Looks up a record, `None` if absent.
    fn record(&self, key: NodeKey, kind: PageKind, index: u32) -> Result<Option<Record>>;

    /// Resolves a name key.
    fn name(&self, kind: NameKind, key: i32) -> Result<Option<String>>;

    /// Highest key allocated in a record tree.
    fn max_record_key(&self, kind: PageKind, index: u32) -> Result<Option<NodeKey>> {
        Ok(self.root_page().tree(kind, index)?.max_key)
    }

    /// Secondary index definitions of this revision.
    fn index_defs(&self) -> &[IndexDef] {
        self.root_page().index_defs()
    }
}

/// A resolved page, either cached and shared or private to a writer.
pub(crate) enum PageHandle<'a> {
    Private(&'a Page),
    Shared(Arc<Page>),
}

impl Deref for PageHandle<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        match self {
            PageHandle::Private(page) => page,
            PageHandle::Shared(page) => page,
        }
    }
}

/// Descends the record trie to the record page that would hold `key`.
pub(crate) fn find_record_page<'a, F>(
    root: PageReference,
    key: NodeKey,
    mut load: F,
) -> Result<Option<PageHandle<'a>>>
where
    F: FnMut(&PageReference) -> Result<PageHandle<'a>>,
{
    let page_key = record_page_key(key);
    if page_key > MAX_RECORD_PAGE_KEY {
        return Ok(None);
    }
    let mut reference = root;
    for level in 0..INDIRECT_LEVELS {
        if reference.is_null() {
            return Ok(None);
        }
        let page = load(&reference)?;
        reference = page.as_indirect()?.get(level_offset(page_key, level));
    }
    if reference.is_null() {
        return Ok(None);
    }
    load(&reference).map(Some)
}
