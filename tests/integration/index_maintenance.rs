//! Secondary index maintenance tests
//!
//! Path, name and CAS indexes are built from the document when created and
//! kept current by every later insert, update, rename and removal. These
//! tests check the indexes against the document after each kind of edit,
//! both inside the write transaction and from committed revisions.

#![allow(missing_docs)]

mod common;

use std::collections::BTreeSet;

use palimpsest::index::IndexReader;
use palimpsest::{
    Atomic, CasFilter, CasFilterRange, ContentType, IndexDef, IndexType, NameFilter, NodeKey,
    NodeReader, NodeReferences, PalimpsestError, Path, PathFilter, Pcr, QName, RecordReader,
    Result, SearchMode,
};

use common::{memory_resource, write_catalogue};

fn path(text: &str) -> Path {
    Path::parse(text).unwrap()
}

fn keys(references: &NodeReferences) -> Vec<NodeKey> {
    references.iter().collect()
}

fn path_entries<R: RecordReader + ?Sized>(
    indexes: &IndexReader<'_, R>,
    id: u32,
) -> Result<Vec<(Pcr, NodeReferences)>> {
    indexes.path_index(id, PathFilter::all())?.collect()
}

fn cas_values<R: RecordReader + ?Sized>(
    indexes: &IndexReader<'_, R>,
    id: u32,
    range: CasFilterRange,
) -> Result<Vec<Atomic>> {
    indexes
        .cas_index_range(id, range)?
        .map(|entry| entry.map(|(key, _)| key.value))
        .collect()
}

fn int_range(min: i64, max: i64, inclusive: bool) -> CasFilterRange {
    CasFilterRange::new(
        Atomic::Int(min),
        Atomic::Int(max),
        inclusive,
        inclusive,
        PathFilter::all(),
    )
}

fn parent_of(reader: &impl NodeReader, key: NodeKey) -> Result<NodeKey> {
    Ok(reader
        .node(key)?
        .and_then(|node| node.parent_key())
        .expect("node has a parent"))
}

#[test]
fn path_index_tracks_inserts_and_removals() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let catalogue = write_catalogue(&mut wtx)?;
    let def = wtx.create_index(IndexDef::path([path("//price")]))?;
    assert_eq!(def.id(), 0);
    assert_eq!(def.index_type(), IndexType::Path);

    let price_pcrs = wtx
        .path_summary()
        .get_pcrs_for_paths(&[path("/library/book/price")])?
        .pcrs;
    let first_price = parent_of(&wtx, catalogue.first_price)?;
    let second_price = parent_of(&wtx, catalogue.second_price)?;
    let entries = path_entries(&wtx.indexes(), def.id())?;
    assert_eq!(entries.len(), 1);
    assert!(price_pcrs.contains(&entries[0].0));
    assert_eq!(keys(&entries[0].1), vec![first_price, second_price]);

    wtx.move_to(catalogue.second_book)?;
    wtx.insert_element_as_right_sibling(&QName::local("book"))?;
    let third_price = wtx.insert_element_as_first_child(&QName::local("price"))?;
    let revision = wtx.commit()?;

    let reader = manager.begin_node_read(revision)?;
    let entries = path_entries(&reader.indexes(), def.id())?;
    assert_eq!(
        keys(&entries[0].1),
        vec![first_price, second_price, third_price]
    );

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(catalogue.second_book)?;
    wtx.remove()?;
    let entries = path_entries(&wtx.indexes(), def.id())?;
    assert_eq!(keys(&entries[0].1), vec![first_price, third_price]);
    wtx.commit()?;

    let entries = path_entries(&reader.indexes(), def.id())?;
    assert_eq!(entries[0].1.len(), 3);
    Ok(())
}

#[test]
fn path_index_created_up_front_follows_attribute_renames() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let def = wtx.create_index(IndexDef::path([path("//@id")]))?;
    assert!(path_entries(&wtx.indexes(), def.id())?.is_empty());

    wtx.insert_element_as_first_child(&QName::local("book"))?;
    let id = wtx.insert_attribute(&QName::local("id"), b"7")?;
    let entries = path_entries(&wtx.indexes(), def.id())?;
    assert_eq!(entries.len(), 1);
    assert_eq!(keys(&entries[0].1), vec![id]);

    wtx.set_name(&QName::local("isbn"))?;
    assert!(path_entries(&wtx.indexes(), def.id())?.is_empty());
    wtx.set_name(&QName::local("id"))?;
    assert_eq!(path_entries(&wtx.indexes(), def.id())?.len(), 1);
    Ok(())
}

#[test]
fn name_index_follows_element_renames() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let catalogue = write_catalogue(&mut wtx)?;
    let def = wtx.create_index(IndexDef::name([], [QName::local("title")]))?;
    let book = QName::local("book");
    let magazine = QName::local("magazine");

    let indexes = wtx.indexes();
    let books = indexes.name_lookup(def.id(), &book)?.unwrap();
    assert_eq!(keys(&books), vec![catalogue.first_book, catalogue.second_book]);
    assert!(indexes.name_lookup(def.id(), &QName::local("title"))?.is_none());
    assert!(indexes.name_lookup(def.id(), &QName::local("id"))?.is_none());

    wtx.move_to(catalogue.second_book)?;
    wtx.set_name(&magazine)?;
    let indexes = wtx.indexes();
    let books = indexes.name_lookup(def.id(), &book)?.unwrap();
    assert_eq!(keys(&books), vec![catalogue.first_book]);
    let magazines = indexes.name_lookup(def.id(), &magazine)?.unwrap();
    assert_eq!(keys(&magazines), vec![catalogue.second_book]);
    let revision = wtx.commit()?;

    let reader = manager.begin_node_read(revision)?;
    let filter = NameFilter::new(
        BTreeSet::from([book.clone(), QName::local("price")]),
        BTreeSet::new(),
    );
    let scanned: BTreeSet<(QName, usize)> = reader
        .indexes()
        .name_index(def.id(), filter)?
        .map(|entry| entry.map(|(name, references)| (name, references.len())))
        .collect::<Result<_>>()?;
    assert_eq!(
        scanned,
        BTreeSet::from([(book, 1), (QName::local("price"), 2)])
    );
    Ok(())
}

#[test]
fn index_ids_are_assigned_and_types_checked() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    write_catalogue(&mut wtx)?;
    let names = wtx.create_index(IndexDef::name([], []))?;
    let values = wtx.create_index(IndexDef::cas(ContentType::Str, []))?;
    assert_eq!((names.id(), values.id()), (0, 1));
    let revision = wtx.commit()?;

    let reader = manager.begin_node_read(revision)?;
    let indexes = reader.indexes();
    assert_eq!(indexes.definition(1)?, &values);
    assert!(matches!(
        indexes.cas_index(
            names.id(),
            CasFilter::new(Atomic::Str("x".into()), SearchMode::Equal, PathFilter::all())
        ),
        Err(PalimpsestError::Usage(_))
    ));
    assert!(matches!(
        indexes.definition(9),
        Err(PalimpsestError::NotFound(_))
    ));

    let older = manager.begin_node_read(revision - 1)?;
    assert!(older.indexes().definition(0).is_err());
    Ok(())
}

#[test]
fn cas_index_answers_point_and_range_queries() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let def = wtx.create_index(IndexDef::cas(ContentType::Int, [path("//v")]))?;
    let values = wtx.insert_element_as_first_child(&QName::local("values"))?;
    let mut texts = Vec::new();
    for value in ["5", "3", "8", "many"] {
        wtx.move_to(values)?;
        wtx.insert_element_as_first_child(&QName::local("v"))?;
        texts.push(wtx.insert_text_as_first_child(value.as_bytes())?);
    }
    wtx.move_to(values)?;
    wtx.insert_element_as_first_child(&QName::local("w"))?;
    wtx.insert_text_as_first_child(b"4")?;

    let indexes = wtx.indexes();
    let equal: Vec<_> = indexes
        .cas_index(
            def.id(),
            CasFilter::new(Atomic::Int(3), SearchMode::Equal, PathFilter::all()),
        )?
        .collect::<Result<_>>()?;
    assert_eq!(equal.len(), 1);
    assert_eq!(keys(&equal[0].1), vec![texts[1]]);

    let ints = |values: &[i64]| values.iter().copied().map(Atomic::Int).collect::<Vec<_>>();
    assert_eq!(cas_values(&indexes, def.id(), int_range(3, 8, true))?, ints(&[3, 5, 8]));
    assert_eq!(cas_values(&indexes, def.id(), int_range(3, 8, false))?, ints(&[5]));
    assert_eq!(cas_values(&indexes, def.id(), int_range(i64::MIN, i64::MAX, true))?, ints(&[3, 5, 8]));

    let greater: Vec<Atomic> = indexes
        .cas_index(
            def.id(),
            CasFilter::new(Atomic::Int(5), SearchMode::Greater, PathFilter::all()),
        )?
        .map(|entry| entry.map(|(key, _)| key.value))
        .collect::<Result<_>>()?;
    assert_eq!(greater, ints(&[8]));
    let at_most: Vec<Atomic> = indexes
        .cas_index(
            def.id(),
            CasFilter::new(Atomic::Int(5), SearchMode::LowerOrEqual, PathFilter::all()),
        )?
        .map(|entry| entry.map(|(key, _)| key.value))
        .collect::<Result<_>>()?;
    assert_eq!(at_most, ints(&[3, 5]));

    let elsewhere = CasFilterRange::new(
        Atomic::Int(0),
        Atomic::Int(10),
        true,
        true,
        PathFilter::new([path("//w")]),
    );
    assert!(cas_values(&indexes, def.id(), elsewhere)?.is_empty());
    let revision = wtx.commit()?;

    let mut wtx = manager.begin_node_write()?;
    wtx.move_to(texts[0])?;
    wtx.set_value(b"9")?;
    wtx.move_to(texts[3])?;
    wtx.set_value(b"1")?;
    wtx.move_to(texts[1])?;
    wtx.remove()?;
    assert_eq!(
        cas_values(&wtx.indexes(), def.id(), int_range(0, 100, true))?,
        ints(&[1, 8, 9])
    );
    wtx.commit()?;

    let reader = manager.begin_node_read(revision)?;
    assert_eq!(
        cas_values(&reader.indexes(), def.id(), int_range(0, 100, true))?,
        ints(&[3, 5, 8])
    );
    Ok(())
}

#[test]
fn cas_index_covers_attribute_values() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let catalogue = write_catalogue(&mut wtx)?;
    let def = wtx.create_index(IndexDef::cas(ContentType::Str, [path("//book/@id")]))?;

    let second_id = wtx
        .node(catalogue.second_book)?
        .and_then(|node| node.as_element().map(|element| element.attributes[0]))
        .expect("second book has an id");
    let found: Vec<_> = wtx
        .indexes()
        .cas_index(
            def.id(),
            CasFilter::new(Atomic::Str("2".into()), SearchMode::Equal, PathFilter::all()),
        )?
        .collect::<Result<_>>()?;
    assert_eq!(found.len(), 1);
    assert_eq!(keys(&found[0].1), vec![second_id]);

    wtx.move_to(second_id)?;
    wtx.set_value(b"20")?;
    let all = CasFilterRange::new(
        Atomic::Str(String::new()),
        Atomic::Str("~".into()),
        true,
        true,
        PathFilter::all(),
    );
    assert_eq!(
        cas_values(&wtx.indexes(), def.id(), all)?,
        vec![Atomic::Str("1".into()), Atomic::Str("20".into())]
    );
    Ok(())
}

#[test]
fn renaming_an_element_repaths_indexed_text() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let catalogue = write_catalogue(&mut wtx)?;
    let def = wtx.create_index(IndexDef::cas(ContentType::Int, [path("/library/book/price")]))?;
    let ints = |values: &[i64]| values.iter().copied().map(Atomic::Int).collect::<Vec<_>>();
    assert_eq!(
        cas_values(&wtx.indexes(), def.id(), int_range(0, 100, true))?,
        ints(&[12, 30])
    );

    wtx.move_to(catalogue.second_book)?;
    wtx.set_name(&QName::local("magazine"))?;
    assert_eq!(
        cas_values(&wtx.indexes(), def.id(), int_range(0, 100, true))?,
        ints(&[12])
    );

    wtx.set_name(&QName::local("book"))?;
    assert_eq!(
        cas_values(&wtx.indexes(), def.id(), int_range(0, 100, true))?,
        ints(&[12, 30])
    );
    Ok(())
}

#[test]
fn double_index_treats_negative_zero_as_zero() -> Result<()> {
    let manager = memory_resource();
    let mut wtx = manager.begin_node_write()?;
    let def = wtx.create_index(IndexDef::cas(ContentType::Dbl, [path("//d")]))?;
    let list = wtx.insert_element_as_first_child(&QName::local("list"))?;
    for value in ["-0.0", "0.5", "-1.5"] {
        wtx.move_to(list)?;
        wtx.insert_element_as_first_child(&QName::local("d"))?;
        wtx.insert_text_as_first_child(value.as_bytes())?;
    }
    let unit = CasFilterRange::new(
        Atomic::Dbl(0.0),
        Atomic::Dbl(1.0),
        true,
        false,
        PathFilter::all(),
    );
    assert_eq!(
        cas_values(&wtx.indexes(), def.id(), unit)?,
        vec![Atomic::Dbl(0.0), Atomic::Dbl(0.5)]
    );
    Ok(())
}
