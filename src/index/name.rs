use std::collections::BTreeSet;

use crate::node::QName;
use crate::primitives::bytes::buf::Cursor;
use crate::types::Result;

use super::avl::KeyCodec;

/// Include and exclude lists of a name index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameFilter {
    included: BTreeSet<QName>,
    excluded: BTreeSet<QName>,
}

impl NameFilter {
    pub fn new(included: BTreeSet<QName>, excluded: BTreeSet<QName>) -> Self {
        Self { included, excluded }
    }

    /// Excluded names never pass. Otherwise a name passes when the include
    /// list is empty or holds it.
    pub fn accepts(&self, name: &QName) -> bool {
        if self.excluded.contains(name) {
            return false;
        }
        self.included.is_empty() || self.included.contains(name)
    }
}

impl KeyCodec for QName {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        key.encode(out);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let name = QName::decode(&mut cur)?;
        cur.finish()?;
        Ok(name)
    }
}
