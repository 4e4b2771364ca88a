use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::metrics::StorageMetrics;
use crate::page::{NameKind, Page, PageKind, PageReference, Record, RevisionRootPage};
use crate::primitives::concurrency::ReaderGuard;
use crate::primitives::storage::Storage;
use crate::types::{NodeKey, PageKey, PalimpsestError, Result, Revision};

use super::{find_record_page, PageHandle, RecordReader};

/// Read-only view of one committed revision.
///
/// Resolved pages are kept in a per-transaction LRU cache. The pinned root
/// never changes, so the transaction sees the same state for its whole
/// lifetime no matter what writers commit meanwhile.
pub struct PageReadTrx {
    storage: Arc<dyn Storage>,
    root: Arc<RevisionRootPage>,
    cache: Mutex<LruCache<PageKey, Arc<Page>>>,
    metrics: Arc<dyn StorageMetrics>,
    _guard: Option<ReaderGuard>,
}

impl PageReadTrx {
    pub(crate) fn open(
        storage: Arc<dyn Storage>,
        uber_reference: &PageReference,
        cache_pages: usize,
        metrics: Arc<dyn StorageMetrics>,
        guard: Option<ReaderGuard>,
    ) -> Result<Self> {
        let uber_page = storage.read(uber_reference)?;
        let uber = uber_page.as_uber()?;
        let root_page = storage.read(&uber.revision_root)?;
        let root = root_page.as_revision_root()?.clone();
        trace!(revision = root.revision(), "trx.read.open");
        Ok(Self::with_root(storage, root, cache_pages, metrics, guard))
    }

    /// View of the empty resource preceding the bootstrap revision.
    pub(crate) fn empty(
        storage: Arc<dyn Storage>,
        cache_pages: usize,
        metrics: Arc<dyn StorageMetrics>,
    ) -> Self {
        Self::with_root(storage, RevisionRootPage::new(), cache_pages, metrics, None)
    }

    fn with_root(
        storage: Arc<dyn Storage>,
        root: RevisionRootPage,
        cache_pages: usize,
        metrics: Arc<dyn StorageMetrics>,
        guard: Option<ReaderGuard>,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_pages).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            root: Arc::new(root),
            cache: Mutex::new(LruCache::new(capacity)),
            metrics,
            _guard: guard,
        }
    }

    /// Commit time of the pinned revision in milliseconds since the epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.root.timestamp_ms()
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn StorageMetrics> {
        &self.metrics
    }

    /// Resolves a committed page through the cache.
    pub(crate) fn load_page(&self, reference: &PageReference) -> Result<Arc<Page>> {
        let key = reference.key().ok_or_else(|| {
            PalimpsestError::Consistency("committed page reference without key".into())
        })?;
        if let Some(page) = self.cache.lock().get(&key) {
            self.metrics.page_cache_hit();
            return Ok(Arc::clone(page));
        }
        let page = Arc::new(self.storage.read(reference)?);
        self.cache.lock().put(key, Arc::clone(&page));
        Ok(page)
    }
}

impl RecordReader for PageReadTrx {
    fn revision(&self) -> Revision {
        self.root.revision()
    }

    fn root_page(&self) -> &RevisionRootPage {
        &self.root
    }

    fn record(&self, key: NodeKey, kind: PageKind, index: u32) -> Result<Option<Record>> {
        let tree = self.root.tree(kind, index)?;
        let page = find_record_page(tree.root, key, |reference| {
            self.load_page(reference).map(PageHandle::Shared)
        })?;
        match page {
            Some(page) => Ok(page.as_record()?.get(key).cloned()),
            None => Ok(None),
        }
    }

    fn name(&self, kind: NameKind, key: i32) -> Result<Option<String>> {
        if self.root.name_page.is_null() {
            return Ok(None);
        }
        let page = self.load_page(&self.root.name_page)?;
        Ok(page.as_name()?.name(kind, key).map(str::to_owned))
    }
}
