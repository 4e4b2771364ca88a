use std::ops::Bound;

use crate::node::QName;
use crate::page::PageKind;
use crate::summary::PathSummaryReader;
use crate::trx::RecordReader;
use crate::types::{PalimpsestError, Pcr, Result};

use super::avl::{AvlIter, AvlTreeReader, SearchMode};
use super::cas::{Atomic, CasFilter, CasFilterRange, CasValue};
use super::name::NameFilter;
use super::path::PathFilter;
use super::references::NodeReferences;
use super::{IndexDef, IndexType};

enum ScanStep {
    Emit,
    Skip,
    Stop,
}

/// Forward-only scan over index entries passing a filter.
///
/// Yields each key with its node references, in key order.
pub struct IndexScan<'a, R: RecordReader + ?Sized, K> {
    iter: Option<AvlIter<'a, R, K, NodeReferences>>,
    step: Box<dyn FnMut(&K) -> ScanStep + 'a>,
}

impl<'a, R, K> IndexScan<'a, R, K>
where
    R: RecordReader + ?Sized,
    K: super::avl::KeyCodec,
{
    fn new(
        iter: AvlIter<'a, R, K, NodeReferences>,
        step: impl FnMut(&K) -> ScanStep + 'a,
    ) -> Self {
        Self {
            iter: Some(iter),
            step: Box::new(step),
        }
    }
}

impl<R, K> Iterator for IndexScan<'_, R, K>
where
    R: RecordReader + ?Sized,
    K: super::avl::KeyCodec,
{
    type Item = Result<(K, NodeReferences)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = match self.iter.as_mut()?.next()? {
                Ok(node) => node,
                Err(err) => {
                    self.iter = None;
                    return Some(Err(err));
                }
            };
            match (self.step)(&node.key) {
                ScanStep::Emit => return Some(Ok((node.key, node.value))),
                ScanStep::Skip => continue,
                ScanStep::Stop => {
                    self.iter = None;
                    return None;
                }
            }
        }
    }
}

/// Opens index scans on one revision, committed or in flight.
pub struct IndexReader<'a, R: RecordReader + ?Sized> {
    trx: &'a R,
}

impl<'a, R: RecordReader + ?Sized> IndexReader<'a, R> {
    pub fn new(trx: &'a R) -> Self {
        Self { trx }
    }

    /// Definition of index `id`.
    pub fn definition(&self, id: u32) -> Result<&'a IndexDef> {
        self.trx
            .index_defs()
            .iter()
            .find(|def| def.id() == id)
            .ok_or(PalimpsestError::NotFound("index"))
    }

    fn expect(&self, id: u32, expected: IndexType) -> Result<&'a IndexDef> {
        let def = self.definition(id)?;
        if def.index_type() != expected {
            return Err(PalimpsestError::Usage(format!(
                "index {id} is a {:?} index, not {expected:?}",
                def.index_type()
            )));
        }
        Ok(def)
    }

    /// Path index entries whose PCR passes `paths`.
    pub fn path_index(&self, id: u32, mut paths: PathFilter) -> Result<IndexScan<'a, R, Pcr>> {
        self.expect(id, IndexType::Path)?;
        paths.refresh(&PathSummaryReader::new(self.trx))?;
        let tree = AvlTreeReader::new(self.trx, PageKind::PathIndex, id);
        Ok(IndexScan::new(tree.iter()?, move |pcr: &Pcr| {
            if paths.accepts(*pcr) {
                ScanStep::Emit
            } else {
                ScanStep::Skip
            }
        }))
    }

    /// Elements named exactly `name`.
    pub fn name_lookup(&self, id: u32, name: &QName) -> Result<Option<NodeReferences>> {
        self.expect(id, IndexType::Name)?;
        AvlTreeReader::<R, QName, NodeReferences>::new(self.trx, PageKind::NameIndex, id)
            .get(name, SearchMode::Equal)
    }

    /// Name index entries passing `names`.
    pub fn name_index(&self, id: u32, names: NameFilter) -> Result<IndexScan<'a, R, QName>> {
        self.expect(id, IndexType::Name)?;
        let tree = AvlTreeReader::new(self.trx, PageKind::NameIndex, id);
        Ok(IndexScan::new(tree.iter()?, move |name: &QName| {
            if names.accepts(name) {
                ScanStep::Emit
            } else {
                ScanStep::Skip
            }
        }))
    }

    /// CAS entries standing in `filter.mode` relation to `filter.value`.
    pub fn cas_index(&self, id: u32, filter: CasFilter) -> Result<IndexScan<'a, R, CasValue>> {
        let (lower, upper) = filter.bounds();
        self.cas_scan(id, lower, upper, filter.paths)
    }

    /// CAS entries inside `range`.
    pub fn cas_index_range(
        &self,
        id: u32,
        range: CasFilterRange,
    ) -> Result<IndexScan<'a, R, CasValue>> {
        let (lower, upper) = range.bounds();
        self.cas_scan(id, lower, upper, range.paths)
    }

    fn cas_scan(
        &self,
        id: u32,
        lower: Bound<Atomic>,
        upper: Bound<Atomic>,
        mut paths: PathFilter,
    ) -> Result<IndexScan<'a, R, CasValue>> {
        self.expect(id, IndexType::Cas)?;
        paths.refresh(&PathSummaryReader::new(self.trx))?;
        let tree = AvlTreeReader::new(self.trx, PageKind::CasIndex, id);
        let iter = match &lower {
            Bound::Unbounded => tree.iter()?,
            Bound::Included(value) => tree.range(
                &CasValue::new(value.clone(), Pcr::MIN),
                SearchMode::GreaterOrEqual,
            )?,
            Bound::Excluded(value) => {
                tree.range(&CasValue::new(value.clone(), Pcr::MAX), SearchMode::Greater)?
            }
        };
        Ok(IndexScan::new(iter, move |key: &CasValue| {
            let beyond = match &upper {
                Bound::Included(max) => key.value > *max,
                Bound::Excluded(max) => key.value >= *max,
                Bound::Unbounded => false,
            };
            if beyond {
                return ScanStep::Stop;
            }
            let below = match &lower {
                Bound::Included(min) => key.value < *min,
                Bound::Excluded(min) => key.value <= *min,
                Bound::Unbounded => false,
            };
            if below || !paths.accepts(key.pcr) {
                ScanStep::Skip
            } else {
                ScanStep::Emit
            }
        }))
    }
}
