//! Revision isolation tests
//!
//! Every commit produces a new immutable revision. These tests verify:
//! - Readers pinned to a revision never observe later commits
//! - Uncommitted and aborted changes stay invisible
//! - Only one write transaction exists at a time
//! - Failed commits leave the newest revision untouched
//! - Unchanged pages are shared between revisions

#![allow(missing_docs)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

use palimpsest::metrics::CounterMetrics;
use palimpsest::page::{PageKind, INDIRECT_LEVELS};
use palimpsest::{
    NodeReader, PalimpsestError, QName, RecordReader, ResourceManager, ResourceOptions, Result,
};
use tempfile::tempdir;

use common::{commit_catalogue, memory_resource, FailingStorage};

#[test]
fn committed_revisions_stay_readable() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let book = wtx.insert_element_as_first_child(&QName::local("book"))?;
    let text = wtx.insert_text_as_first_child(b"first")?;
    assert_eq!(wtx.commit()?, 1);

    let mut wtx = manager.begin_node_write()?;
    assert!(wtx.move_to(book)?);
    let added = wtx.insert_element_as_right_sibling(&QName::local("book"))?;
    assert!(wtx.move_to(text)?);
    wtx.set_value(b"second")?;
    assert_eq!(wtx.commit()?, 2);
    assert_eq!(manager.most_recent_revision()?, 2);

    let mut old = manager.begin_node_read(1)?;
    assert!(!old.move_to(added)?);
    assert!(old.move_to(text)?);
    assert_eq!(old.value_string()?.as_deref(), Some("first"));
    assert!(old.move_to_document_root()?);
    assert_eq!(old.child_count(), 1);

    let mut new = manager.begin_node_read(2)?;
    assert!(new.move_to(added)?);
    assert!(new.move_to(text)?);
    assert_eq!(new.value_string()?.as_deref(), Some("second"));
    assert!(new.move_to_document_root()?);
    assert_eq!(new.child_count(), 2);

    let bootstrap = manager.begin_node_read(0)?;
    assert_eq!(bootstrap.child_count(), 0);
    assert!(matches!(
        manager.begin_node_read(3),
        Err(PalimpsestError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn open_reader_keeps_its_snapshot() -> Result<()> {
    let manager = memory_resource();
    let (catalogue, revision) = commit_catalogue(&manager)?;
    let mut reader = manager.begin_node_read(revision)?;

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.first_book)?;
    wtx.insert_attribute(&QName::local("lang"), b"en")?;
    wtx.move_to(catalogue.second_book)?;
    wtx.remove()?;

    assert!(reader.move_to(catalogue.first_book)?);
    assert_eq!(reader.attribute_count(), 1);
    assert!(reader.move_to(catalogue.second_book)?);
    let next = wtx.commit()?;

    assert!(reader.move_to(catalogue.first_book)?);
    assert_eq!(reader.attribute_count(), 1);
    assert!(reader.move_to(catalogue.second_price)?);
    assert_eq!(reader.value_string()?.as_deref(), Some("30"));

    let mut fresh = manager.begin_node_read(next)?;
    assert!(fresh.move_to(catalogue.first_book)?);
    assert_eq!(fresh.attribute_count(), 2);
    assert!(!fresh.move_to(catalogue.second_price)?);
    assert!(fresh.move_to(catalogue.library)?);
    assert_eq!(fresh.child_count(), 1);
    Ok(())
}

#[test]
fn aborted_and_dropped_writes_leave_no_trace() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    wtx.insert_element_as_first_child(&QName::local("draft"))?;
    wtx.abort();

    {
        let mut wtx = manager.begin_node_write()?;
        wtx.insert_element_as_first_child(&QName::local("draft"))?;
    }
    assert_eq!(manager.most_recent_revision()?, 0);
    assert!(!manager.lock_snapshot().writer);

    let root = manager.begin_node_read(0)?;
    assert_eq!(root.child_count(), 0);
    assert_eq!(root.descendant_count(), 0);

    let wtx = manager.begin_node_write()?;
    assert_eq!(wtx.revision(), 1);
    Ok(())
}

#[test]
fn second_writer_is_refused_across_threads() -> Result<()> {
    let manager = Arc::new(memory_resource());
    let wtx = manager.begin_node_write()?;

    let other = Arc::clone(&manager);
    let outcome = thread::spawn(move || other.begin_node_write().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(outcome, Err(PalimpsestError::Concurrency(_))));

    drop(wtx);
    let mut wtx = manager.begin_node_write()?;
    wtx.insert_element_as_first_child(&QName::local("late"))?;
    assert_eq!(wtx.commit()?, 1);
    Ok(())
}

#[test]
fn concurrent_readers_see_their_own_revision() -> Result<()> {
    const READERS: usize = 4;
    let manager = Arc::new(memory_resource());
    let (catalogue, first) = commit_catalogue(&manager)?;
    let barrier = Arc::new(Barrier::new(READERS + 1));

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<()> {
                let mut reader = manager.begin_node_read(first)?;
                barrier.wait();
                for _ in 0..50 {
                    assert!(reader.move_to(catalogue.first_price)?);
                    assert_eq!(reader.value_string()?.as_deref(), Some("12"));
                    assert!(reader.move_to(catalogue.library)?);
                    assert_eq!(reader.child_count(), 2);
                }
                Ok(())
            })
        })
        .collect();

    barrier.wait();
    for price in ["13", "14", "15"] {
        let mut wtx = manager.begin_node_write()?;
        wtx.move_to(catalogue.first_price)?;
        wtx.set_value(price.as_bytes())?;
        wtx.commit()?;
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    let mut latest = manager.begin_node_read(manager.most_recent_revision()?)?;
    assert!(latest.move_to(catalogue.first_price)?);
    assert_eq!(latest.value_string()?.as_deref(), Some("15"));
    assert_eq!(manager.lock_snapshot().readers, 1);
    drop(latest);
    assert_eq!(manager.lock_snapshot().readers, 0);
    Ok(())
}

#[test]
fn truncate_drops_newer_revisions() -> Result<()> {
    let manager = memory_resource();
    for name in ["a", "b", "c"] {
        let mut wtx = manager.begin_node_write()?;
        wtx.insert_element_as_first_child(&QName::local(name))?;
        wtx.commit()?;
    }
    assert_eq!(manager.most_recent_revision()?, 3);

    manager.truncate_to(1)?;
    assert_eq!(manager.most_recent_revision()?, 1);
    assert!(matches!(
        manager.begin_node_read(2),
        Err(PalimpsestError::NotFound(_))
    ));

    let mut wtx = manager.begin_node_write()?;
    assert_eq!(wtx.revision(), 2);
    assert_eq!(wtx.child_count(), 1);
    wtx.insert_element_as_first_child(&QName::local("d"))?;
    assert_eq!(wtx.commit()?, 2);
    let root = manager.begin_node_read(2)?;
    assert_eq!(root.child_count(), 2);

    let wtx = manager.begin_node_write()?;
    assert!(matches!(
        manager.truncate_to(0),
        Err(PalimpsestError::Concurrency(_))
    ));
    drop(wtx);
    Ok(())
}

#[test]
fn reader_on_truncated_revision_reports_missing_pages() -> Result<()> {
    let manager = memory_resource();
    let mut keys = Vec::new();
    for name in ["a", "b"] {
        let mut wtx = manager.begin_node_write()?;
        keys.push(wtx.insert_element_as_first_child(&QName::local(name))?);
        wtx.commit()?;
    }
    let stale = manager.begin_read(2)?;
    manager.truncate_to(1)?;

    let mut wtx = manager.begin_node_write()?;
    wtx.insert_element_as_first_child(&QName::local("replacement"))?;
    assert_eq!(wtx.commit()?, 2);

    assert!(matches!(
        stale.record(keys[1], PageKind::Document, 0),
        Err(PalimpsestError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn second_handle_on_same_directory_cannot_write_concurrently() -> Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    let first = ResourceManager::open(ResourceOptions::file(dir.path()))?;
    let second = ResourceManager::open(ResourceOptions::file(dir.path()))?;

    let mut wtx = first.begin_node_write()?;
    let from_first = wtx.insert_element_as_first_child(&QName::local("from_first"))?;
    assert!(matches!(
        second.begin_node_write(),
        Err(PalimpsestError::Concurrency(_))
    ));
    assert_eq!(wtx.commit()?, 1);

    assert_eq!(second.most_recent_revision()?, 1);
    let mut wtx = second.begin_node_write()?;
    assert_eq!(wtx.revision(), 2);
    assert!(wtx.move_to(from_first)?);
    let from_second =
        wtx.insert_element_as_right_sibling(&QName::local("from_second_longer_name"))?;
    assert_eq!(wtx.commit()?, 2);
    assert!(first.begin_node_write().is_ok());
    drop((first, second));

    let reopened = ResourceManager::open(ResourceOptions::file(dir.path()))?;
    let mut one = reopened.begin_node_read(1)?;
    assert!(one.move_to_first_child()?);
    assert_eq!(one.node_key(), from_first);
    assert!(!one.move_to(from_second)?);
    let mut two = reopened.begin_node_read(2)?;
    assert!(two.move_to(from_second)?);
    assert!(two.move_to(from_first)?);
    Ok(())
}

#[test]
fn edit_failing_halfway_dooms_the_transaction() -> Result<()> {
    common::init_tracing();
    let storage = Arc::new(FailingStorage::new());
    let manager = ResourceManager::with_storage(ResourceOptions::in_memory(), storage.clone())?;
    let (catalogue, revision) = commit_catalogue(&manager)?;

    let mut doomed = false;
    for reads in 0..64 {
        let mut wtx = manager.begin_node_write()?;
        assert!(wtx.move_to(catalogue.second_book)?);
        storage.fail_reads_after(reads);
        let outcome = wtx.insert_attribute(&QName::local("lang"), b"en");
        storage.disarm();
        match outcome {
            Ok(_) => {
                wtx.abort();
                break;
            }
            Err(err) => {
                assert!(matches!(err, PalimpsestError::Io(_)));
                if wtx.is_poisoned() {
                    doomed = true;
                    assert!(wtx.move_to(catalogue.first_book)?);
                    assert!(matches!(
                        wtx.insert_element_as_right_sibling(&QName::local("late")),
                        Err(PalimpsestError::Usage(_))
                    ));
                    assert!(matches!(wtx.commit(), Err(PalimpsestError::Usage(_))));
                } else {
                    wtx.abort();
                }
            }
        }
    }
    assert!(doomed);
    assert_eq!(manager.most_recent_revision()?, revision);
    assert!(!manager.lock_snapshot().writer);

    let mut wtx = manager.begin_node_write()?;
    assert!(wtx.move_to(catalogue.second_book)?);
    wtx.insert_attribute(&QName::local("id"), b"3").unwrap_err();
    assert!(!wtx.is_poisoned());
    wtx.insert_attribute(&QName::local("lang"), b"en")?;
    assert_eq!(wtx.commit()?, revision + 1);
    let mut reader = manager.begin_node_read(revision + 1)?;
    assert!(reader.move_to(catalogue.second_book)?);
    assert_eq!(reader.attribute_count(), 2);
    Ok(())
}

#[test]
fn failed_commit_keeps_previous_revision() -> Result<()> {
    common::init_tracing();
    let storage = Arc::new(FailingStorage::new());
    let manager = ResourceManager::with_storage(ResourceOptions::in_memory(), storage.clone())?;
    let (catalogue, revision) = commit_catalogue(&manager)?;
    assert_eq!(revision, 1);

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.first_title)?;
    wtx.set_value(b"Children of Dune")?;
    storage.fail_after(2);
    assert!(matches!(wtx.commit(), Err(PalimpsestError::Io(_))));
    storage.disarm();

    assert_eq!(manager.most_recent_revision()?, 1);
    assert!(!manager.lock_snapshot().writer);
    let mut reader = manager.begin_node_read(1)?;
    assert!(reader.move_to(catalogue.first_title)?);
    assert_eq!(reader.value_string()?.as_deref(), Some("Dune"));

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.first_title)?;
    wtx.set_value(b"Dune Messiah")?;
    assert_eq!(wtx.commit()?, 2);
    let mut reader = manager.begin_node_read(2)?;
    assert!(reader.move_to(catalogue.first_title)?);
    assert_eq!(reader.value_string()?.as_deref(), Some("Dune Messiah"));
    Ok(())
}

#[test]
fn small_edit_clones_one_page_path() -> Result<()> {
    common::init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let manager = ResourceManager::open(ResourceOptions::in_memory().with_metrics(metrics.clone()))?;
    let (catalogue, _) = commit_catalogue(&manager)?;
    let commits = metrics.commits.load(Ordering::Relaxed);

    let before = metrics.pages_cloned.load(Ordering::Relaxed);
    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.second_price)?;
    wtx.set_value(b"31")?;
    wtx.commit()?;
    let cloned = metrics.pages_cloned.load(Ordering::Relaxed) - before;

    // From the tree root indirect page down to the record page.
    assert_eq!(cloned, u64::from(INDIRECT_LEVELS) + 1);
    assert_eq!(metrics.commits.load(Ordering::Relaxed), commits + 1);
    Ok(())
}
