//! Structural hashing tests
//!
//! Hashes depend on kinds, names, values and child order only. Edits clear
//! the hashes on the ancestor chain and commit recomputes them.

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use palimpsest::primitives::storage::MemoryStorage;
use palimpsest::{
    HashKind, NodeKey, NodeReader, NodeWriteTrx, PalimpsestError, QName, ResourceManager,
    ResourceOptions, Result,
};
use proptest::prelude::*;

use common::{commit_catalogue, memory_resource};

fn insert_book(wtx: &mut NodeWriteTrx, title: &[u8]) -> Result<NodeKey> {
    let book = wtx.insert_element_as_first_child(&QName::local("book"))?;
    wtx.insert_attribute(&QName::local("lang"), b"en")?;
    wtx.move_to(book)?;
    wtx.insert_element_as_first_child(&QName::local("title"))?;
    wtx.insert_text_as_first_child(title)?;
    Ok(book)
}

fn hash_of(reader: &mut impl NodeReader, key: NodeKey) -> Result<Option<u128>> {
    assert!(reader.move_to(key)?);
    Ok(reader.hash())
}

/// Inserts one `<item>` per value below the document root, keeping `values`
/// in document order whatever order the inserts run in.
fn document_hash(values: &[String], reversed: bool) -> Result<Option<u128>> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let list = wtx.insert_element_as_first_child(&QName::local("list"))?;
    if reversed {
        for value in values.iter().rev() {
            wtx.move_to(list)?;
            wtx.insert_element_as_first_child(&QName::local("item"))?;
            wtx.insert_text_as_first_child(value.as_bytes())?;
        }
    } else {
        let mut previous = None;
        for value in values {
            let item = match previous {
                None => wtx.insert_element_as_first_child(&QName::local("item"))?,
                Some(previous) => {
                    wtx.move_to(previous)?;
                    wtx.insert_element_as_right_sibling(&QName::local("item"))?
                }
            };
            wtx.insert_text_as_first_child(value.as_bytes())?;
            previous = Some(item);
        }
    }
    let revision = wtx.commit()?;
    let reader = manager.begin_node_read(revision)?;
    Ok(reader.hash())
}

#[test]
fn identical_subtrees_hash_alike() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let shelf = wtx.insert_element_as_first_child(&QName::local("shelf"))?;
    let first = insert_book(&mut wtx, b"Dune")?;
    wtx.move_to(shelf)?;
    let second = insert_book(&mut wtx, b"Dune")?;
    wtx.move_to(shelf)?;
    let other = insert_book(&mut wtx, b"Emma")?;
    let revision = wtx.commit()?;

    let mut reader = manager.begin_node_read(revision)?;
    let first_hash = hash_of(&mut reader, first)?.expect("hashed");
    assert_eq!(hash_of(&mut reader, second)?, Some(first_hash));
    assert_ne!(hash_of(&mut reader, other)?, Some(first_hash));
    assert!(hash_of(&mut reader, shelf)?.is_some());
    Ok(())
}

#[test]
fn edits_clear_ancestor_hashes_until_rehash() -> Result<()> {
    let manager = memory_resource();
    let (catalogue, revision) = commit_catalogue(&manager)?;
    let mut committed = manager.begin_node_read(revision)?;
    let root_hash = hash_of(&mut committed, NodeKey::ROOT)?.expect("hashed");
    let untouched = hash_of(&mut committed, catalogue.first_book)?;

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.second_price)?;
    wtx.set_value(b"99")?;
    for key in [catalogue.second_price, catalogue.second_book, catalogue.library, NodeKey::ROOT] {
        assert_eq!(hash_of(&mut wtx, key)?, None, "node {key:?} kept a stale hash");
    }
    assert_eq!(hash_of(&mut wtx, catalogue.first_book)?, untouched);

    let changed = wtx.rehash()?.expect("hashing enabled");
    assert_ne!(changed, root_hash);
    assert_eq!(hash_of(&mut wtx, NodeKey::ROOT)?, Some(changed));
    assert!(hash_of(&mut wtx, catalogue.second_book)?.is_some());

    wtx.move_to(catalogue.second_price)?;
    wtx.set_value(b"30")?;
    assert_eq!(wtx.rehash()?, Some(root_hash));
    let next = wtx.commit()?;

    let mut reader = manager.begin_node_read(next)?;
    assert_eq!(hash_of(&mut reader, NodeKey::ROOT)?, Some(root_hash));
    Ok(())
}

#[test]
fn renames_and_removals_change_the_hash() -> Result<()> {
    let manager = memory_resource();
    let (catalogue, revision) = commit_catalogue(&manager)?;
    let mut committed = manager.begin_node_read(revision)?;
    let root_hash = hash_of(&mut committed, NodeKey::ROOT)?;

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.second_book)?;
    wtx.set_name(&QName::local("magazine"))?;
    let renamed = wtx.rehash()?;
    assert_ne!(renamed, root_hash);

    wtx.move_to(catalogue.first_book)?;
    wtx.remove()?;
    let removed = wtx.rehash()?;
    assert_ne!(removed, renamed);
    assert_ne!(removed, root_hash);
    Ok(())
}

#[test]
fn disabled_hashing_leaves_nodes_unhashed() -> Result<()> {
    common::init_tracing();
    let manager =
        ResourceManager::open(ResourceOptions::in_memory().with_hash_kind(HashKind::None))?;
    let (catalogue, revision) = commit_catalogue(&manager)?;
    let mut reader = manager.begin_node_read(revision)?;
    assert_eq!(hash_of(&mut reader, NodeKey::ROOT)?, None);
    assert_eq!(hash_of(&mut reader, catalogue.first_title)?, None);

    let mut wtx = manager.begin_node_write()?;
    assert_eq!(wtx.rehash()?, None);
    Ok(())
}

#[test]
fn seed_changes_document_hash() -> Result<()> {
    common::init_tracing();
    let mut hashes = Vec::new();
    for seed in [0, 1] {
        let mut options = ResourceOptions::in_memory();
        options.hash_seed = seed;
        let manager = ResourceManager::open(options)?;
        let (_, revision) = commit_catalogue(&manager)?;
        hashes.push(manager.begin_node_read(revision)?.hash());
    }
    assert_ne!(hashes[0], hashes[1]);
    Ok(())
}

#[test]
fn order_labels_are_kept_but_not_hashed() -> Result<()> {
    let manager = memory_resource();
    let (catalogue, first) = commit_catalogue(&manager)?;
    let before = manager.begin_node_read(first)?.hash();

    let mut wtx = manager.begin_node_write()?;
    assert!(wtx.move_to(catalogue.second_book)?);
    assert_eq!(wtx.order_label(), None);
    wtx.set_order_label(Some(&[1u8, 5, 3][..]))?;
    assert_eq!(wtx.order_label(), Some(&[1u8, 5, 3][..]));
    let second = wtx.commit()?;

    let mut labelled = manager.begin_node_read(second)?;
    assert_eq!(labelled.hash(), before);
    assert!(labelled.move_to(catalogue.second_book)?);
    assert_eq!(labelled.order_label(), Some(&[1u8, 5, 3][..]));
    assert!(labelled.move_to(catalogue.first_book)?);
    assert_eq!(labelled.order_label(), None);

    let mut original = manager.begin_node_read(first)?;
    assert!(original.move_to(catalogue.second_book)?);
    assert_eq!(original.order_label(), None);

    let mut wtx = manager.begin_node_write()?;
    assert!(wtx.move_to(catalogue.second_book)?);
    wtx.set_order_label(None)?;
    let third = wtx.commit()?;
    let mut cleared = manager.begin_node_read(third)?;
    assert!(cleared.move_to(catalogue.second_book)?);
    assert_eq!(cleared.order_label(), None);
    Ok(())
}

#[test]
fn reopening_with_other_hash_settings_is_refused() -> Result<()> {
    common::init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let structural = ResourceOptions::in_memory().with_hash_kind(HashKind::Structural);
    let text = {
        let manager = ResourceManager::with_storage(structural.clone(), storage.clone())?;
        let mut wtx = manager.begin_node_write()?;
        wtx.insert_element_as_first_child(&QName::local("a"))?;
        let text = wtx.insert_text_as_first_child(b"one")?;
        wtx.commit()?;
        text
    };

    let unhashed = ResourceOptions::in_memory().with_hash_kind(HashKind::None);
    assert!(matches!(
        ResourceManager::with_storage(unhashed, storage.clone()),
        Err(PalimpsestError::Usage(_))
    ));
    let reseeded = structural.clone().with_hash_seed(9);
    assert!(matches!(
        ResourceManager::with_storage(reseeded, storage.clone()),
        Err(PalimpsestError::Usage(_))
    ));

    let manager = ResourceManager::with_storage(structural, storage)?;
    let before = manager.begin_node_read(1)?.hash();
    let mut wtx = manager.begin_node_write()?;
    assert!(wtx.move_to(text)?);
    wtx.set_value(b"two")?;
    let after = wtx.rehash()?;
    assert!(after.is_some());
    assert_ne!(after, before);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn hash_ignores_insertion_order(values in proptest::collection::vec("[a-z]{0,6}", 1..12)) {
        let forward = document_hash(&values, false).unwrap();
        let reversed = document_hash(&values, true).unwrap();
        prop_assert!(forward.is_some());
        prop_assert_eq!(forward, reversed);
    }
}
