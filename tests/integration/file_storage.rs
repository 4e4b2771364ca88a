//! Storage backend tests
//!
//! Covers the file backend across reopen, recovery from an interrupted
//! commit, checksum verification and options loaded from TOML.

#![allow(missing_docs)]

mod common;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use palimpsest::primitives::storage::{MemoryStorage, Storage};
use palimpsest::{
    Atomic, CasFilter, ContentType, HashKind, IndexDef, NodeReader, PalimpsestError, Path,
    PathFilter, QName, ResourceManager, ResourceOptions, Result, SearchMode, StorageKind,
};
use tempfile::tempdir;

use common::{commit_catalogue, init_tracing};

#[test]
fn revisions_survive_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let (catalogue, price_index) = {
        let manager = ResourceManager::open(ResourceOptions::file(dir.path()))?;
        let (catalogue, first) = commit_catalogue(&manager)?;
        assert_eq!(first, 1);

        let mut wtx = manager.begin_node_write()?;
        let def = wtx.create_index(IndexDef::cas(
            ContentType::Int,
            [Path::parse("//price")?],
        ))?;
        wtx.move_to(catalogue.first_price)?;
        wtx.set_value(b"14")?;
        assert_eq!(wtx.commit()?, 2);
        (catalogue, def)
    };

    let manager = ResourceManager::open(ResourceOptions::file(dir.path()))?;
    assert_eq!(manager.most_recent_revision()?, 2);
    assert!(manager.revision_timestamp(1)? <= manager.revision_timestamp(2)?);

    let mut first = manager.begin_node_read(1)?;
    assert!(first.move_to(catalogue.first_price)?);
    assert_eq!(first.value_string()?.as_deref(), Some("12"));
    assert!(first.indexes().definition(price_index.id()).is_err());

    let mut second = manager.begin_node_read(2)?;
    assert!(second.move_to(catalogue.first_title)?);
    assert_eq!(second.value_string()?.as_deref(), Some("Dune"));
    assert_eq!(second.indexes().definition(price_index.id())?, &price_index);

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.second_price)?;
    wtx.set_value(b"31")?;
    assert_eq!(wtx.commit()?, 3);
    let third = manager.begin_node_read(3)?;
    let hits: Vec<_> = third
        .indexes()
        .cas_index(
            price_index.id(),
            CasFilter::new(Atomic::Int(31), SearchMode::Equal, PathFilter::all()),
        )?
        .collect::<Result<_>>()?;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].1.contains(catalogue.second_price));
    Ok(())
}

#[test]
fn interrupted_commit_tail_is_discarded() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let catalogue = {
        let manager = ResourceManager::open(ResourceOptions::file(dir.path()))?;
        commit_catalogue(&manager)?.0
    };
    let data = dir.path().join("pages.dat");
    let committed_len = fs::metadata(&data)?.len();
    OpenOptions::new()
        .append(true)
        .open(&data)?
        .write_all(&[0, 0, 0, 9, 1, 2, 3])?;

    let manager = ResourceManager::open(ResourceOptions::file(dir.path()))?;
    assert_eq!(fs::metadata(&data)?.len(), committed_len);
    assert_eq!(manager.most_recent_revision()?, 1);

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.library)?;
    wtx.insert_comment_as_first_child(b"restocked")?;
    assert_eq!(wtx.commit()?, 2);
    let reader = manager.begin_node_read(2)?;
    assert_eq!(reader.descendant_count(), 10);
    Ok(())
}

#[test]
fn corrupted_page_fails_checksum() -> Result<()> {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let manager = ResourceManager::with_storage(ResourceOptions::in_memory(), storage.clone())?;
    commit_catalogue(&manager)?;

    let uber = storage.read_uber_page_reference()?.expect("committed");
    let root = storage.read(&uber)?.as_uber()?.revision_root;
    storage.overwrite_page(root.key().expect("persisted"), vec![7; 24])?;

    assert!(matches!(
        manager.begin_node_read(1),
        Err(PalimpsestError::Consistency(_))
    ));
    assert!(matches!(
        manager.begin_node_write(),
        Err(PalimpsestError::Consistency(_))
    ));
    Ok(())
}

#[test]
fn options_load_from_toml() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let resource = dir.path().join("resource");
    let config = dir.path().join("palimpsest.toml");
    fs::write(
        &config,
        format!(
            "hash_kind = \"none\"\ncache_pages = 8\ncompress_values_over = 16\n\n[storage]\nkind = \"file\"\npath = {:?}\n",
            resource.display().to_string()
        ),
    )?;
    let options = ResourceOptions::from_toml_file(&config).expect("valid options");
    assert_eq!(options.hash_kind, HashKind::None);
    assert_eq!(options.cache_pages, 8);
    assert_eq!(
        options.storage,
        StorageKind::File {
            path: resource.clone()
        }
    );

    let long = "a fairly long paragraph that is stored compressed ".repeat(4);
    let text = {
        let manager = ResourceManager::open(options.clone())?;
        let mut wtx = manager.begin_node_write()?;
        wtx.insert_element_as_first_child(&QName::local("p"))?;
        let text = wtx.insert_text_as_first_child(long.as_bytes())?;
        assert_eq!(wtx.rehash()?, None);
        wtx.commit()?;
        text
    };

    let manager = ResourceManager::open(options)?;
    let mut reader = manager.begin_node_read(1)?;
    assert!(reader.move_to(text)?);
    assert_eq!(reader.value_string()?.as_deref(), Some(long.as_str()));
    assert_eq!(reader.hash(), None);
    assert!(resource.join("pages.dat").exists());
    Ok(())
}
