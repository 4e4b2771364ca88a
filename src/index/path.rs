use std::collections::BTreeSet;

use crate::summary::{Path, PathSummaryReader};
use crate::trx::RecordReader;
use crate::types::{Pcr, Result};

/// Restricts index entries to the PCRs matching a set of path patterns.
///
/// The PCR set is resolved lazily against the path summary and resolved
/// again whenever the summary has grown past the PCR high-water mark seen
/// last time. PCRs are never reused, so a grown mark is the only way the
/// matching set can change.
#[derive(Clone, Debug, Default)]
pub struct PathFilter {
    paths: Vec<Path>,
    pcrs: BTreeSet<Pcr>,
    max_pcr: Option<Pcr>,
}

impl PathFilter {
    pub fn new(paths: impl IntoIterator<Item = Path>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            pcrs: BTreeSet::new(),
            max_pcr: None,
        }
    }

    /// Filter accepting every PCR.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// Re-resolves the PCR set if the summary gained path nodes.
    pub fn refresh<R: RecordReader + ?Sized>(
        &mut self,
        summary: &PathSummaryReader<'_, R>,
    ) -> Result<()> {
        if self.paths.is_empty() {
            return Ok(());
        }
        let max_pcr = summary.max_pcr()?;
        if self.max_pcr.map_or(true, |seen| max_pcr > seen) {
            let resolved = summary.get_pcrs_for_paths(&self.paths)?;
            self.pcrs = resolved.pcrs;
            self.max_pcr = Some(resolved.max_pcr);
        }
        Ok(())
    }

    /// Whether `pcr` passes, as of the last refresh.
    pub fn accepts(&self, pcr: Pcr) -> bool {
        self.paths.is_empty() || self.pcrs.contains(&pcr)
    }

    /// Refreshes, then tests `pcr`.
    pub fn filter<R: RecordReader + ?Sized>(
        &mut self,
        summary: &PathSummaryReader<'_, R>,
        pcr: Pcr,
    ) -> Result<bool> {
        self.refresh(summary)?;
        Ok(self.accepts(pcr))
    }

    /// Resolved PCRs; empty for a filter accepting everything.
    pub fn pcrs(&self) -> &BTreeSet<Pcr> {
        &self.pcrs
    }
}
