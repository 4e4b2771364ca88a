use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::primitives::bytes::buf::{self, Cursor};
use crate::primitives::bytes::var;
use crate::types::{PalimpsestError, Result};

/// Name key stored for an empty prefix or URI.
pub const NULL_NAME_KEY: i32 = -1;

/// Dictionary a name is interned in.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum NameKind {
    /// Element prefixes and local names.
    Element = 0,
    /// Attribute prefixes and local names.
    Attribute = 1,
    /// Namespace prefixes and every namespace URI.
    Namespace = 2,
    /// Processing instruction targets.
    ProcessingInstruction = 3,
}

const NAME_KINDS: usize = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct NameEntry {
    name: String,
    count: u32,
}

/// One reference-counted string dictionary.
#[derive(Clone, Debug, Default)]
struct Dictionary {
    entries: BTreeMap<i32, NameEntry>,
    lookup: FxHashMap<String, i32>,
    next_key: i32,
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.next_key == other.next_key
    }
}

impl Dictionary {
    fn intern(&mut self, name: &str) -> Result<i32> {
        if let Some(&key) = self.lookup.get(name) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.count += 1;
                return Ok(key);
            }
        }
        let key = self.next_key;
        self.next_key = key
            .checked_add(1)
            .ok_or_else(|| PalimpsestError::Usage("name dictionary exhausted".into()))?;
        self.entries.insert(
            key,
            NameEntry {
                name: name.to_owned(),
                count: 1,
            },
        );
        self.lookup.insert(name.to_owned(), key);
        Ok(key)
    }

    fn release(&mut self, key: i32) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or(PalimpsestError::NotFound("name"))?;
        entry.count -= 1;
        if entry.count == 0 {
            if let Some(entry) = self.entries.remove(&key) {
                self.lookup.remove(&entry.name);
            }
        }
        Ok(())
    }
}

/// Name dictionaries of one revision.
///
/// Qualified names are stored in nodes as integer keys; the dictionary keeps
/// a reference count per string so unused names disappear again.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamePage {
    dictionaries: [Dictionary; NAME_KINDS],
}

impl NamePage {
    /// Creates empty dictionaries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning its key. Empty names map to [`NULL_NAME_KEY`].
    pub fn set_name(&mut self, kind: NameKind, name: &str) -> Result<i32> {
        if name.is_empty() {
            return Ok(NULL_NAME_KEY);
        }
        self.dictionaries[kind as usize].intern(name)
    }

    /// Drops one reference to `key`.
    pub fn remove_name(&mut self, kind: NameKind, key: i32) -> Result<()> {
        if key == NULL_NAME_KEY {
            return Ok(());
        }
        self.dictionaries[kind as usize].release(key)
    }

    /// Resolves `key`; [`NULL_NAME_KEY`] resolves to the empty string.
    pub fn name(&self, kind: NameKind, key: i32) -> Option<&str> {
        if key == NULL_NAME_KEY {
            return Some("");
        }
        self.dictionaries[kind as usize]
            .entries
            .get(&key)
            .map(|entry| entry.name.as_str())
    }

    /// Key of an interned name without touching its count.
    pub fn key_of(&self, kind: NameKind, name: &str) -> Option<i32> {
        if name.is_empty() {
            return Some(NULL_NAME_KEY);
        }
        self.dictionaries[kind as usize].lookup.get(name).copied()
    }

    /// Reference count of `key`.
    pub fn count(&self, kind: NameKind, key: i32) -> u32 {
        self.dictionaries[kind as usize]
            .entries
            .get(&key)
            .map_or(0, |entry| entry.count)
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        for dictionary in &self.dictionaries {
            var::encode_i64(i64::from(dictionary.next_key), out);
            var::encode_u64(dictionary.entries.len() as u64, out);
            for (key, entry) in &dictionary.entries {
                var::encode_i64(i64::from(*key), out);
                buf::put_str(out, &entry.name);
                var::encode_u64(u64::from(entry.count), out);
            }
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let mut page = Self::new();
        for dictionary in page.dictionaries.iter_mut() {
            dictionary.next_key = decode_i32(cur)?;
            let count = cur.varint()?;
            for _ in 0..count {
                let key = decode_i32(cur)?;
                let name = cur.string()?;
                let count = u32::try_from(cur.varint()?).map_err(|_| {
                    PalimpsestError::Consistency("name reference count overflow".into())
                })?;
                dictionary.lookup.insert(name.clone(), key);
                dictionary.entries.insert(key, NameEntry { name, count });
            }
        }
        Ok(page)
    }
}

fn decode_i32(cur: &mut Cursor<'_>) -> Result<i32> {
    i32::try_from(cur.varint_i64()?)
        .map_err(|_| PalimpsestError::Consistency("name key out of range".into()))
}
