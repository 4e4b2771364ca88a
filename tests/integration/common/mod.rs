//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

use palimpsest::page::{Page, PageReference};
use palimpsest::primitives::storage::{MemoryStorage, Storage};
use palimpsest::{
    NodeKey, NodeReader, NodeWriteTrx, PalimpsestError, QName, ResourceManager, ResourceOptions,
    Result, Revision,
};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn memory_resource() -> ResourceManager {
    init_tracing();
    ResourceManager::open(ResourceOptions::in_memory()).unwrap()
}

/// Keys of a small catalogue written by [`write_catalogue`].
#[derive(Debug, Clone, Copy)]
pub struct Catalogue {
    pub library: NodeKey,
    pub first_book: NodeKey,
    pub first_title: NodeKey,
    pub first_price: NodeKey,
    pub second_book: NodeKey,
    pub second_price: NodeKey,
}

/// Builds
/// `<library><book id="1"><title>Dune</title><price>12</price></book>`
/// `<book id="2"><price>30</price></book></library>`
/// below the document root. Price keys point at the text nodes.
pub fn write_catalogue(wtx: &mut NodeWriteTrx) -> Result<Catalogue> {
    wtx.move_to_document_root()?;
    let library = wtx.insert_element_as_first_child(&QName::local("library"))?;
    let first_book = wtx.insert_element_as_first_child(&QName::local("book"))?;
    wtx.insert_attribute(&QName::local("id"), b"1")?;
    wtx.move_to(first_book)?;
    wtx.insert_element_as_first_child(&QName::local("title"))?;
    let first_title = wtx.insert_text_as_first_child(b"Dune")?;
    wtx.move_to_parent()?;
    wtx.insert_element_as_right_sibling(&QName::local("price"))?;
    let first_price = wtx.insert_text_as_first_child(b"12")?;

    wtx.move_to(first_book)?;
    let second_book = wtx.insert_element_as_right_sibling(&QName::local("book"))?;
    wtx.insert_attribute(&QName::local("id"), b"2")?;
    wtx.move_to(second_book)?;
    wtx.insert_element_as_first_child(&QName::local("price"))?;
    let second_price = wtx.insert_text_as_first_child(b"30")?;
    Ok(Catalogue {
        library,
        first_book,
        first_title,
        first_price,
        second_book,
        second_price,
    })
}

/// Commits a catalogue as the next revision.
pub fn commit_catalogue(manager: &ResourceManager) -> Result<(Catalogue, Revision)> {
    let mut wtx = manager.begin_node_write()?;
    let catalogue = write_catalogue(&mut wtx)?;
    Ok((catalogue, wtx.commit()?))
}

/// Lets a fixed number of calls through once armed, then fails every call.
#[derive(Default)]
struct Tripwire {
    armed: AtomicBool,
    budget: AtomicUsize,
}

impl Tripwire {
    fn arm(&self, calls: usize) {
        self.budget.store(calls, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<()> {
        if !self.armed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let admitted = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if admitted {
            Ok(())
        } else {
            Err(PalimpsestError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {what} failure"),
            )))
        }
    }
}

/// Memory backend whose reads or writes start failing on demand.
#[derive(Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    reads: Tripwire,
    writes: Tripwire,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `writes` more page writes through, then fails every write.
    pub fn fail_after(&self, writes: usize) {
        self.writes.arm(writes);
    }

    /// Lets `reads` more page reads through, then fails every read.
    pub fn fail_reads_after(&self, reads: usize) {
        self.reads.arm(reads);
    }

    pub fn disarm(&self) {
        self.reads.disarm();
        self.writes.disarm();
    }
}

impl Storage for FailingStorage {
    fn read(&self, reference: &PageReference) -> Result<Page> {
        self.reads.check("read")?;
        self.inner.read(reference)
    }

    fn read_uber_page_reference(&self) -> Result<Option<PageReference>> {
        self.inner.read_uber_page_reference()
    }

    fn write(&self, reference: &mut PageReference, page: &Page) -> Result<()> {
        self.writes.check("write")?;
        self.inner.write(reference, page)
    }

    fn write_uber_page_reference(&self, reference: &mut PageReference, page: &Page) -> Result<()> {
        self.writes.check("write")?;
        self.inner.write_uber_page_reference(reference, page)
    }

    fn truncate_to(&self, revision: Revision) -> Result<()> {
        self.inner.truncate_to(revision)
    }

    fn exists(&self) -> Result<bool> {
        self.inner.exists()
    }
}
