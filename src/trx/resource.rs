use std::sync::Arc;

use tracing::{debug, info};

use crate::metrics::{default_metrics, StorageMetrics};
use crate::node::{NodeConfig, NodeReadTrx, NodeWriteTrx};
use crate::options::ResourceOptions;
use crate::page::PageReference;
use crate::primitives::concurrency::{LockSnapshot, SingleWriter, WriterGuard};
use crate::primitives::storage::{locate_uber_page, open_storage, Storage};
use crate::types::{PalimpsestError, Result, Revision};

use super::{PageReadTrx, PageWriteTrx, RecordReader};

/// Entry point to one resource: a versioned document with its indexes.
///
/// Hands out any number of read transactions and at most one write
/// transaction at a time. Opening an empty backend commits the bootstrap
/// revision 0, which holds the document root and the path summary root.
pub struct ResourceManager {
    options: ResourceOptions,
    storage: Arc<dyn Storage>,
    lock: SingleWriter,
    metrics: Arc<dyn StorageMetrics>,
}

impl ResourceManager {
    /// Opens the backend named by `options`.
    pub fn open(options: ResourceOptions) -> Result<Self> {
        let storage = open_storage(&options)?;
        Self::with_storage(options, storage)
    }

    /// Opens a resource over an already constructed backend.
    pub fn with_storage(options: ResourceOptions, storage: Arc<dyn Storage>) -> Result<Self> {
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let lock = match storage.lock_file() {
            Some(file) => SingleWriter::with_lock_file(file),
            None => SingleWriter::new(),
        };
        let manager = Self {
            options,
            storage,
            lock,
            metrics,
        };
        if !manager.storage.exists()? {
            manager.bootstrap()?;
        }
        manager.check_hash_settings()?;
        info!(
            revision = manager.most_recent_revision()?,
            "resource.open"
        );
        Ok(manager)
    }

    fn bootstrap(&self) -> Result<()> {
        let guard = self.acquire_writer()?;
        if self.storage.exists()? {
            return Ok(());
        }
        let base = PageReadTrx::empty(
            Arc::clone(&self.storage),
            self.options.cache_pages,
            Arc::clone(&self.metrics),
        );
        let trx = PageWriteTrx::new(base, PageReference::default(), 1, guard);
        let revision = NodeWriteTrx::new(trx, self.node_config())?.commit()?;
        debug!(revision, "resource.bootstrap");
        Ok(())
    }

    /// Refuses options that would hash differently from the settings stored
    /// with the resource.
    fn check_hash_settings(&self) -> Result<()> {
        let requested = self.node_config().hash_settings();
        match self.begin_read_latest()?.root_page().hash_settings() {
            Some(stored) if stored != requested => Err(PalimpsestError::Usage(format!(
                "resource was created with {:?} hashing and seed {}, not {:?} and seed {}",
                stored.kind, stored.seed, requested.kind, requested.seed
            ))),
            _ => Ok(()),
        }
    }

    /// Claims the writer slot and brings the backend up to the newest
    /// committed revision.
    fn acquire_writer(&self) -> Result<WriterGuard> {
        let guard = self.lock.acquire_writer()?;
        self.storage.recover()?;
        Ok(guard)
    }

    /// Options the resource was opened with.
    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    /// Settings node write transactions of this resource run with.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig::from_options(&self.options)
    }

    /// Backend holding the pages of every revision.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Newest committed revision.
    pub fn most_recent_revision(&self) -> Result<Revision> {
        self.storage.refresh()?;
        let reference = self
            .storage
            .read_uber_page_reference()?
            .ok_or(PalimpsestError::NotFound("revision"))?;
        Ok(self.storage.read(&reference)?.as_uber()?.revision())
    }

    /// Read transaction pinned to `revision`.
    pub fn begin_read(&self, revision: Revision) -> Result<PageReadTrx> {
        let guard = self.lock.acquire_reader();
        self.storage.refresh()?;
        let uber = locate_uber_page(self.storage.as_ref(), revision)?;
        PageReadTrx::open(
            Arc::clone(&self.storage),
            &uber,
            self.options.cache_pages,
            Arc::clone(&self.metrics),
            Some(guard),
        )
    }

    /// Read transaction on the newest revision.
    pub fn begin_read_latest(&self) -> Result<PageReadTrx> {
        self.begin_read(self.most_recent_revision()?)
    }

    /// The write transaction, building on the newest revision.
    ///
    /// Fails with [`PalimpsestError::Concurrency`] while another write
    /// transaction is open.
    pub fn begin_write(&self) -> Result<PageWriteTrx> {
        let guard = self.acquire_writer()?;
        let uber_reference = self
            .storage
            .read_uber_page_reference()?
            .ok_or(PalimpsestError::NotFound("revision"))?;
        let revision_count = self.storage.read(&uber_reference)?.as_uber()?.revision_count;
        let base = PageReadTrx::open(
            Arc::clone(&self.storage),
            &uber_reference,
            self.options.cache_pages,
            Arc::clone(&self.metrics),
            None,
        )?;
        Ok(PageWriteTrx::new(
            base,
            uber_reference,
            revision_count + 1,
            guard,
        ))
    }

    /// Node cursor over `revision`, positioned at the document root.
    pub fn begin_node_read(&self, revision: Revision) -> Result<NodeReadTrx> {
        NodeReadTrx::new(self.begin_read(revision)?)
    }

    /// Node-level write transaction on the newest revision.
    pub fn begin_node_write(&self) -> Result<NodeWriteTrx> {
        NodeWriteTrx::new(self.begin_write()?, self.node_config())
    }

    /// Drops every revision newer than `revision`.
    ///
    /// Needs the writer slot. Read transactions still open on dropped
    /// revisions fail on their next uncached page load: with
    /// [`PalimpsestError::NotFound`] while the space is unused, and with a
    /// checksum [`PalimpsestError::Consistency`] once the file backend has
    /// appended new pages over it. The memory backend never reuses keys.
    pub fn truncate_to(&self, revision: Revision) -> Result<()> {
        let _guard = self.acquire_writer()?;
        let newest = self.most_recent_revision()?;
        self.storage.truncate_to(revision)?;
        info!(revision, dropped = newest.saturating_sub(revision), "resource.truncate");
        Ok(())
    }

    /// Commit time of `revision` in milliseconds since the epoch.
    pub fn revision_timestamp(&self, revision: Revision) -> Result<u64> {
        let trx = self.begin_read(revision)?;
        debug_assert_eq!(trx.revision(), revision);
        Ok(trx.timestamp_ms())
    }

    /// Open transactions, for observability.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        self.lock.snapshot()
    }
}
