use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::index::IndexDef;
use crate::metrics::StorageMetrics;
use crate::page::{
    level_offset, record_page_key, HashSettings, IndirectPage, LogKey, NameKind, NamePage, Page, PageKind,
    PageReference, Record, RecordPage, RevisionRootPage, UberPage, INDIRECT_LEVELS,
    MAX_RECORD_PAGE_KEY,
};
use crate::primitives::concurrency::WriterGuard;
use crate::primitives::storage::Storage;
use crate::types::{NodeKey, PalimpsestError, Result, Revision};

use super::{find_record_page, PageHandle, PageReadTrx, RecordReader};

/// Private pages of a write transaction, addressed by [`LogKey`].
#[derive(Default)]
struct PageLog {
    pages: Vec<Option<Page>>,
}

impl PageLog {
    fn push(&mut self, page: Page) -> Result<LogKey> {
        let slot = u32::try_from(self.pages.len())
            .map_err(|_| PalimpsestError::Usage("page log exhausted".into()))?;
        self.pages.push(Some(page));
        Ok(LogKey(slot))
    }

    fn get(&self, key: LogKey) -> Result<&Page> {
        self.pages
            .get(key.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| PalimpsestError::Consistency(format!("page log slot {} empty", key.0)))
    }

    fn get_mut(&mut self, key: LogKey) -> Result<&mut Page> {
        self.pages
            .get_mut(key.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| PalimpsestError::Consistency(format!("page log slot {} empty", key.0)))
    }

    fn take(&mut self, key: LogKey) -> Result<Page> {
        self.pages
            .get_mut(key.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| PalimpsestError::Consistency(format!("page log slot {} empty", key.0)))
    }

    fn len(&self) -> usize {
        self.pages.len()
    }
}

/// The single write transaction of a resource.
///
/// Mutations land in a private page log and stay invisible to every reader
/// until [`PageWriteTrx::commit`] advances the uber pointer. Dropping the
/// transaction without committing discards the log.
pub struct PageWriteTrx {
    base: PageReadTrx,
    root: RevisionRootPage,
    log: PageLog,
    previous_uber: PageReference,
    revision_count: u32,
    metrics: Arc<dyn StorageMetrics>,
    edits: u64,
    finished: bool,
    _guard: WriterGuard,
}

impl PageWriteTrx {
    /// Starts the next revision on top of `base`.
    ///
    /// `previous_uber` is the uber page `base` was opened from, or a null
    /// reference when creating the bootstrap revision.
    pub(crate) fn new(
        base: PageReadTrx,
        previous_uber: PageReference,
        revision_count: u32,
        guard: WriterGuard,
    ) -> Self {
        let revision = revision_count.saturating_sub(1);
        let root = base.root_page().successor(revision);
        let metrics = Arc::clone(base.metrics());
        debug!(revision, "trx.write.begin");
        Self {
            base,
            root,
            log: PageLog::default(),
            previous_uber,
            revision_count,
            metrics,
            edits: 0,
            finished: false,
            _guard: guard,
        }
    }

    /// Revision most recently committed before this transaction began.
    pub fn base_revision(&self) -> Option<Revision> {
        if self.previous_uber.is_null() {
            None
        } else {
            Some(self.base.revision())
        }
    }

    /// Number of mutating calls made so far. Unchanged across a call means
    /// the call left the transaction untouched.
    pub fn edits(&self) -> u64 {
        self.edits
    }

    /// Number of pages privately held by this transaction.
    pub fn dirty_pages(&self) -> usize {
        self.log.len()
    }

    /// Allocates the next record key of a record tree.
    pub fn new_record_key(&mut self, kind: PageKind, index: u32) -> Result<NodeKey> {
        let tree = self.root.tree_mut(kind, index)?;
        let key = tree.next_key();
        if record_page_key(key) > MAX_RECORD_PAGE_KEY {
            return Err(PalimpsestError::Usage(format!(
                "record tree {kind:?}/{index} is full"
            )));
        }
        tree.observe(key);
        self.edits += 1;
        Ok(key)
    }

    /// Stores `record` under `key`, replacing any previous record.
    pub fn create_entry(
        &mut self,
        key: NodeKey,
        record: Record,
        kind: PageKind,
        index: u32,
    ) -> Result<&mut Record> {
        self.edits += 1;
        let slot = self.prepare_record_page(key, kind, index)?;
        self.root.tree_mut(kind, index)?.observe(key);
        self.log.get_mut(slot)?.as_record_mut()?.insert(key, record)
    }

    /// Private, mutable copy of the record under `key`.
    pub fn prepare_entry_for_modification(
        &mut self,
        key: NodeKey,
        kind: PageKind,
        index: u32,
    ) -> Result<&mut Record> {
        if self.record(key, kind, index)?.is_none() {
            return Err(PalimpsestError::NotFound("record"));
        }
        self.edits += 1;
        let slot = self.prepare_record_page(key, kind, index)?;
        self.log
            .get_mut(slot)?
            .as_record_mut()?
            .get_mut(key)
            .ok_or(PalimpsestError::NotFound("record"))
    }

    /// Removes the record under `key` and returns it.
    pub fn remove_entry(&mut self, key: NodeKey, kind: PageKind, index: u32) -> Result<Record> {
        if self.record(key, kind, index)?.is_none() {
            return Err(PalimpsestError::NotFound("record"));
        }
        self.edits += 1;
        let slot = self.prepare_record_page(key, kind, index)?;
        self.log
            .get_mut(slot)?
            .as_record_mut()?
            .remove(key)
            .ok_or(PalimpsestError::NotFound("record"))
    }

    /// Private, mutable copy of the name dictionaries.
    pub fn name_page_mut(&mut self) -> Result<&mut NamePage> {
        self.edits += 1;
        let slot = self.prepare_page(self.root.name_page, || Page::Name(NamePage::new()))?;
        self.root.name_page = PageReference::logged(slot);
        self.log.get_mut(slot)?.as_name_mut()
    }

    /// Records the hash settings of a fresh resource, or checks `settings`
    /// against the ones the resource was created with.
    pub(crate) fn adopt_hash_settings(&mut self, settings: HashSettings) -> Result<()> {
        match self.root.hash_settings() {
            None => {
                self.edits += 1;
                self.root.set_hash_settings(settings);
                Ok(())
            }
            Some(stored) if stored == settings => Ok(()),
            Some(stored) => Err(PalimpsestError::Usage(format!(
                "resource was created with {:?} hashing and seed {}, not {:?} and seed {}",
                stored.kind, stored.seed, settings.kind, settings.seed
            ))),
        }
    }

    /// Registers a secondary index definition and its empty record tree.
    pub(crate) fn register_index(&mut self, def: IndexDef) -> Result<()> {
        self.edits += 1;
        self.root.add_index_tree(def.page_kind(), def.id())?;
        self.root.push_index_def(def);
        Ok(())
    }

    /// Writes every private page, then the revision root and the uber page.
    ///
    /// On error nothing becomes visible: the uber pointer still names the
    /// previous revision and the transaction is dropped.
    pub fn commit(mut self) -> Result<Revision> {
        let storage = Arc::clone(self.base.storage());
        let revision = self.root.revision();
        let dirty = self.log.len();
        let mut root = std::mem::take(&mut self.root);
        for reference in root.references_mut() {
            flush(&mut self.log, storage.as_ref(), reference)?;
        }
        root.set_timestamp(now_ms());
        let mut root_reference = PageReference::default();
        storage.write(&mut root_reference, &Page::RevisionRoot(root))?;

        let uber = UberPage {
            revision_count: self.revision_count,
            revision_root: root_reference,
            previous: self.previous_uber,
        };
        let mut uber_reference = PageReference::default();
        storage.write_uber_page_reference(&mut uber_reference, &Page::Uber(uber))?;

        self.finished = true;
        self.metrics.commit();
        info!(revision, pages = dirty + 2, "trx.write.commit");
        Ok(revision)
    }

    /// Discards every private page.
    pub fn abort(mut self) {
        self.finished = true;
        self.metrics.abort();
        debug!(revision = self.root.revision(), "trx.write.abort");
    }

    fn page_handle(&self, reference: &PageReference) -> Result<PageHandle<'_>> {
        match reference.log_key() {
            Some(slot) => Ok(PageHandle::Private(self.log.get(slot)?)),
            None => Ok(PageHandle::Shared(self.base.load_page(reference)?)),
        }
    }

    /// Returns the log slot of the page behind `reference`, cloning a
    /// committed page or creating a fresh one on first touch.
    fn prepare_page(
        &mut self,
        reference: PageReference,
        fresh: impl FnOnce() -> Page,
    ) -> Result<LogKey> {
        if let Some(slot) = reference.log_key() {
            return Ok(slot);
        }
        let page = if reference.is_null() {
            fresh()
        } else {
            self.metrics.page_cloned();
            (*self.base.load_page(&reference)?).clone()
        };
        self.log.push(page)
    }

    /// Makes the whole root-to-leaf path of `key` private.
    fn prepare_record_page(&mut self, key: NodeKey, kind: PageKind, index: u32) -> Result<LogKey> {
        let page_key = record_page_key(key);
        if page_key > MAX_RECORD_PAGE_KEY {
            return Err(PalimpsestError::Usage(format!(
                "record key {key} is outside the addressable range"
            )));
        }
        let tree_root = self.root.tree(kind, index)?.root;
        let mut slot = self.prepare_page(tree_root, || Page::Indirect(IndirectPage::new()))?;
        self.root.tree_mut(kind, index)?.root = PageReference::logged(slot);
        for level in 0..INDIRECT_LEVELS {
            let offset = level_offset(page_key, level);
            let child = self.log.get(slot)?.as_indirect()?.get(offset);
            let child_slot = if level + 1 == INDIRECT_LEVELS {
                self.prepare_page(child, || Page::Record(RecordPage::new(kind, page_key)))?
            } else {
                self.prepare_page(child, || Page::Indirect(IndirectPage::new()))?
            };
            self.log
                .get_mut(slot)?
                .as_indirect_mut()?
                .set(offset, PageReference::logged(child_slot))?;
            slot = child_slot;
        }
        Ok(slot)
    }
}

fn flush(log: &mut PageLog, storage: &dyn Storage, reference: &mut PageReference) -> Result<()> {
    let Some(slot) = reference.log_key() else {
        return Ok(());
    };
    let mut page = log.take(slot)?;
    if let Page::Indirect(indirect) = &mut page {
        for child in indirect.references_mut() {
            flush(log, storage, child)?;
        }
    }
    storage.write(reference, &page)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

impl RecordReader for PageWriteTrx {
    fn revision(&self) -> Revision {
        self.root.revision()
    }

    fn root_page(&self) -> &RevisionRootPage {
        &self.root
    }

    fn record(&self, key: NodeKey, kind: PageKind, index: u32) -> Result<Option<Record>> {
        let tree = self.root.tree(kind, index)?;
        let page = find_record_page(tree.root, key, |reference| self.page_handle(reference))?;
        match page {
            Some(page) => Ok(page.as_record()?.get(key).cloned()),
            None => Ok(None),
        }
    }

    fn name(&self, kind: NameKind, key: i32) -> Result<Option<String>> {
        if self.root.name_page.is_null() {
            return Ok(None);
        }
        let page = self.page_handle(&self.root.name_page)?;
        Ok(page.as_name()?.name(kind, key).map(str::to_owned))
    }
}

impl Drop for PageWriteTrx {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.abort();
            debug!(
                revision = self.root.revision(),
                dirty = self.log.len(),
                "trx.write.dropped_without_commit"
            );
        }
    }
}
