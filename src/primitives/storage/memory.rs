use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::metrics::{default_metrics, StorageMetrics};
use crate::page::{encode_page, Page, PageReference};
use crate::types::{page_crc32, PageKey, PalimpsestError, Result, Revision};

use super::{decode_verified, ensure_uber, locate_uber_page, verified_key, Storage};

/// Keeps serialized pages in memory.
///
/// Pages still go through the page codec so readers never share mutable
/// state with the writer. Keys are never handed out twice, not even after a
/// truncation.
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    verify_checksums: bool,
    metrics: Arc<dyn StorageMetrics>,
}

#[derive(Default)]
struct MemoryState {
    pages: BTreeMap<PageKey, Arc<[u8]>>,
    next_key: u64,
    uber: Option<PageReference>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            verify_checksums: true,
            metrics: default_metrics(),
        }
    }

    /// Enables or disables checksum verification on read.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Installs a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Number of stored pages.
    pub fn page_count(&self) -> usize {
        self.state.read().pages.len()
    }

    /// Overwrites the stored image of a page. Used to simulate corruption.
    pub fn overwrite_page(&self, key: PageKey, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.state.write();
        let slot = state
            .pages
            .get_mut(&key)
            .ok_or(PalimpsestError::NotFound("page"))?;
        *slot = Arc::from(bytes);
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn read(&self, reference: &PageReference) -> Result<Page> {
        let key = verified_key(reference)?;
        let bytes = self
            .state
            .read()
            .pages
            .get(&key)
            .cloned()
            .ok_or(PalimpsestError::NotFound("page"))?;
        decode_verified(
            reference,
            key,
            &bytes,
            self.verify_checksums,
            self.metrics.as_ref(),
        )
    }

    fn read_uber_page_reference(&self) -> Result<Option<PageReference>> {
        Ok(self.state.read().uber)
    }

    fn write(&self, reference: &mut PageReference, page: &Page) -> Result<()> {
        let bytes = encode_page(page)?;
        let mut state = self.state.write();
        let key = PageKey(state.next_key);
        state.next_key += 1;
        let hash = page_crc32(key.0, &bytes);
        self.metrics.page_written(bytes.len());
        state.pages.insert(key, Arc::from(bytes));
        reference.set_persisted(key, hash);
        Ok(())
    }

    fn write_uber_page_reference(
        &self,
        reference: &mut PageReference,
        page: &Page,
    ) -> Result<()> {
        ensure_uber(page)?;
        self.write(reference, page)?;
        self.state.write().uber = Some(*reference);
        Ok(())
    }

    fn truncate_to(&self, revision: Revision) -> Result<()> {
        let target = locate_uber_page(self, revision)?;
        let key = verified_key(&target)?;
        let mut state = self.state.write();
        let dropped = state.pages.split_off(&PageKey(key.0 + 1));
        state.uber = Some(target);
        debug!(revision, dropped = dropped.len(), "storage.memory.truncate");
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.state.read().uber.is_some())
    }
}
