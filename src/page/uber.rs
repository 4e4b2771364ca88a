use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::types::{PalimpsestError, Result, Revision};

use super::reference::PageReference;

/// Top of the page graph: the latest revision and a link to its predecessor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UberPage {
    /// Number of committed revisions including this one.
    pub revision_count: u32,
    /// Root page of the newest revision.
    pub revision_root: PageReference,
    /// Uber page of the previous revision, null for the first one.
    pub previous: PageReference,
}

impl UberPage {
    /// Revision whose root this uber page points to.
    pub fn revision(&self) -> Revision {
        self.revision_count.saturating_sub(1)
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        var::encode_u64(u64::from(self.revision_count), out);
        self.revision_root.encode(out)?;
        self.previous.encode(out)
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let revision_count = u32::try_from(cur.varint()?)
            .map_err(|_| PalimpsestError::Consistency("revision count out of range".into()))?;
        let revision_root = PageReference::decode(cur)?;
        let previous = PageReference::decode(cur)?;
        Ok(Self {
            revision_count,
            revision_root,
            previous,
        })
    }
}
