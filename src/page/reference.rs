use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::types::{PageKey, PalimpsestError, Result};

/// Slot of a private page in a write transaction's page log.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LogKey(pub(crate) u32);

/// Indirection cell pointing at a page.
///
/// A committed reference carries the durable `key` and the crc32 `hash` of
/// the page image. While a write transaction holds a private copy of the
/// page, `log_key` points into that transaction's page log instead; such a
/// reference never reaches storage.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct PageReference {
    key: Option<PageKey>,
    log_key: Option<LogKey>,
    hash: u32,
}

impl PageReference {
    /// Reference to a page that was already written.
    pub fn persisted(key: PageKey, hash: u32) -> Self {
        Self {
            key: Some(key),
            log_key: None,
            hash,
        }
    }

    pub(crate) fn logged(log_key: LogKey) -> Self {
        Self {
            key: None,
            log_key: Some(log_key),
            hash: 0,
        }
    }

    /// Durable key, if the page has been written.
    pub fn key(&self) -> Option<PageKey> {
        self.key
    }

    /// Checksum of the referenced page image.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub(crate) fn log_key(&self) -> Option<LogKey> {
        self.log_key
    }

    /// Returns `true` when the reference points nowhere.
    pub fn is_null(&self) -> bool {
        self.key.is_none() && self.log_key.is_none()
    }

    /// Records the outcome of a durable write.
    pub fn set_persisted(&mut self, key: PageKey, hash: u32) {
        self.key = Some(key);
        self.hash = hash;
        self.log_key = None;
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.log_key.is_some() {
            return Err(PalimpsestError::Consistency(
                "cannot serialize a reference to an unwritten page".into(),
            ));
        }
        match self.key {
            Some(key) => {
                out.push(1);
                var::encode_u64(key.0, out);
                out.extend_from_slice(&self.hash.to_be_bytes());
            }
            None => out.push(0),
        }
        Ok(())
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        match cur.u8()? {
            0 => Ok(Self::default()),
            1 => {
                let key = PageKey(cur.varint()?);
                let hash = cur.u32_be()?;
                Ok(Self::persisted(key, hash))
            }
            other => Err(PalimpsestError::Consistency(format!(
                "invalid page reference tag {other}"
            ))),
        }
    }
}
