use crate::primitives::bytes::buf::Cursor;
use crate::types::{PalimpsestError, Result};

use super::{IndirectPage, NamePage, Page, RecordPage, RevisionRootPage, UberPage};

/// Version byte leading every serialized page.
pub const PAGE_FORMAT_VERSION: u8 = 2;

const TAG_UBER: u8 = 1;
const TAG_REVISION_ROOT: u8 = 2;
const TAG_INDIRECT: u8 = 3;
const TAG_RECORD: u8 = 4;
const TAG_NAME: u8 = 5;

/// Serializes a page. Fails if the page still references unwritten pages.
pub fn encode_page(page: &Page) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.push(PAGE_FORMAT_VERSION);
    match page {
        Page::Uber(uber) => {
            out.push(TAG_UBER);
            uber.encode(&mut out)?;
        }
        Page::RevisionRoot(root) => {
            out.push(TAG_REVISION_ROOT);
            root.encode(&mut out)?;
        }
        Page::Indirect(indirect) => {
            out.push(TAG_INDIRECT);
            indirect.encode(&mut out)?;
        }
        Page::Record(records) => {
            out.push(TAG_RECORD);
            records.encode(&mut out);
        }
        Page::Name(names) => {
            out.push(TAG_NAME);
            names.encode(&mut out);
        }
    }
    Ok(out)
}

/// Parses a page produced by [`encode_page`].
pub fn decode_page(bytes: &[u8]) -> Result<Page> {
    let mut cur = Cursor::new(bytes);
    let version = cur.u8()?;
    if version != PAGE_FORMAT_VERSION {
        return Err(PalimpsestError::Consistency(format!(
            "unsupported page format version {version}"
        )));
    }
    let page = match cur.u8()? {
        TAG_UBER => Page::Uber(UberPage::decode(&mut cur)?),
        TAG_REVISION_ROOT => Page::RevisionRoot(RevisionRootPage::decode(&mut cur)?),
        TAG_INDIRECT => Page::Indirect(IndirectPage::decode(&mut cur)?),
        TAG_RECORD => Page::Record(RecordPage::decode(&mut cur)?),
        TAG_NAME => Page::Name(NamePage::decode(&mut cur)?),
        other => {
            return Err(PalimpsestError::Consistency(format!(
                "unknown page tag {other}"
            )))
        }
    };
    cur.finish()?;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{NameKind, PageKind, PageReference, RecordTree};
    use crate::types::{NodeKey, PageKey};

    #[test]
    fn revision_root_survives_codec() -> Result<()> {
        let mut root = RevisionRootPage::new().successor(3);
        root.set_timestamp(1_700_000_000_000);
        root.name_page = PageReference::persisted(PageKey(8), 11);
        root.document = RecordTree {
            root: PageReference::persisted(PageKey(16), 22),
            max_key: Some(NodeKey(41)),
        };
        root.add_index_tree(PageKind::PathIndex, 0)?;
        let bytes = encode_page(&Page::RevisionRoot(root.clone()))?;
        assert_eq!(decode_page(&bytes)?, Page::RevisionRoot(root));
        Ok(())
    }

    #[test]
    fn rejects_unknown_version_and_trailing_bytes() -> Result<()> {
        let mut names = NamePage::new();
        names.set_name(NameKind::Element, "x")?;
        let mut bytes = encode_page(&Page::Name(names))?;
        bytes.push(0);
        assert!(matches!(
            decode_page(&bytes),
            Err(PalimpsestError::Consistency(_))
        ));
        bytes.pop();
        bytes[0] = 9;
        assert!(decode_page(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn empty_record_page_round_trips() -> Result<()> {
        let page = Page::Record(RecordPage::new(PageKind::Document, 2));
        assert_eq!(decode_page(&encode_page(&page)?)?, page);
        Ok(())
    }
}
