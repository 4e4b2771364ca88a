#![forbid(unsafe_code)]
//! Storage backends persisting serialized pages.
//!
//! A backend assigns every written page a monotonically increasing
//! [`PageKey`] and stamps the reference with a crc32 of the page image.
//! The uber page is written last through
//! [`Storage::write_uber_page_reference`]; advancing the uber pointer is the
//! commit point of a revision.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use crate::metrics::StorageMetrics;
use crate::options::{ResourceOptions, StorageKind};
use crate::primitives::concurrency::LockFile;
use crate::page::{decode_page, Page, PageReference};
use crate::types::{page_crc32, PageKey, PalimpsestError, Result, Revision};

/// Durable page store of one resource.
pub trait Storage: Send + Sync + 'static {
    /// Reads and decodes the page behind `reference`.
    fn read(&self, reference: &PageReference) -> Result<Page>;
    /// Reference to the newest uber page, `None` for a fresh resource.
    fn read_uber_page_reference(&self) -> Result<Option<PageReference>>;
    /// Writes `page`, filling in the reference's key and checksum.
    fn write(&self, reference: &mut PageReference, page: &Page) -> Result<()>;
    /// Writes an uber page and makes it the newest one.
    fn write_uber_page_reference(&self, reference: &mut PageReference, page: &Page)
        -> Result<()>;
    /// Drops every revision newer than `revision`.
    fn truncate_to(&self, revision: Revision) -> Result<()>;
    /// Whether at least one revision has been committed.
    fn exists(&self) -> Result<bool>;

    /// Lock file guarding the writer slot across handles, if the backend is
    /// shared beyond one process-local value.
    fn lock_file(&self) -> Option<LockFile> {
        None
    }

    /// Picks up revisions committed through other handles.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Called once the writer slot has been claimed: reloads the newest
    /// revision and drops pages left behind by an interrupted commit.
    fn recover(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens the backend selected by `options`.
pub fn open_storage(options: &ResourceOptions) -> Result<Arc<dyn Storage>> {
    let metrics = options
        .metrics
        .clone()
        .unwrap_or_else(crate::metrics::default_metrics);
    let storage: Arc<dyn Storage> = match &options.storage {
        StorageKind::Memory => Arc::new(
            MemoryStorage::new()
                .with_verify_checksums(options.verify_checksums)
                .with_metrics(metrics),
        ),
        StorageKind::File { path } => Arc::new(
            FileStorage::open(path)?
                .with_verify_checksums(options.verify_checksums)
                .with_metrics(metrics),
        ),
    };
    Ok(storage)
}

/// Walks the uber page chain down to the uber page of `revision`.
pub fn locate_uber_page(storage: &dyn Storage, revision: Revision) -> Result<PageReference> {
    let mut reference = storage
        .read_uber_page_reference()?
        .ok_or(PalimpsestError::NotFound("revision"))?;
    loop {
        let page = storage.read(&reference)?;
        let uber = page.as_uber()?;
        if uber.revision() == revision {
            return Ok(reference);
        }
        if uber.revision() < revision {
            return Err(PalimpsestError::NotFound("revision"));
        }
        if uber.previous.is_null() {
            return Err(PalimpsestError::NotFound("revision"));
        }
        reference = uber.previous;
    }
}

fn verified_key(reference: &PageReference) -> Result<PageKey> {
    reference.key().ok_or_else(|| {
        PalimpsestError::Usage("cannot read through a reference without a page key".into())
    })
}

fn decode_verified(
    reference: &PageReference,
    key: PageKey,
    bytes: &[u8],
    verify: bool,
    metrics: &dyn StorageMetrics,
) -> Result<Page> {
    if verify {
        let actual = page_crc32(key.0, bytes);
        if actual != reference.hash() {
            return Err(PalimpsestError::Consistency(format!(
                "checksum mismatch for page {key}: expected {:08x}, found {actual:08x}",
                reference.hash()
            )));
        }
    }
    metrics.page_read();
    decode_page(bytes)
}

fn ensure_uber(page: &Page) -> Result<()> {
    match page {
        Page::Uber(_) => Ok(()),
        other => Err(PalimpsestError::Usage(format!(
            "uber pointer must reference an uber page, got {}",
            other.type_name()
        ))),
    }
}
