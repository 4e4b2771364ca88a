use std::fmt;

use crate::primitives::bytes::buf::{self, Cursor};
use crate::types::{PalimpsestError, Result};

/// Qualified name: namespace prefix, local name and namespace URI.
///
/// Ordered by local name first so name index scans group equal local names
/// regardless of prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    local: String,
    prefix: String,
    uri: String,
}

impl QName {
    /// Unprefixed name without namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            prefix: String::new(),
            uri: String::new(),
        }
    }

    /// Fully specified name.
    pub fn new(prefix: impl Into<String>, local: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }

    /// Parses `prefix:local` or `local`. The URI stays empty.
    pub fn parse(text: &str) -> Result<Self> {
        let (prefix, local) = match text.split_once(':') {
            Some((prefix, local)) => (prefix, local),
            None => ("", text),
        };
        if local.is_empty() || local.contains(':') {
            return Err(PalimpsestError::Usage(format!("invalid qualified name {text:?}")));
        }
        Ok(Self::new(prefix, local, ""))
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        buf::put_str(out, &self.prefix);
        buf::put_str(out, &self.local);
        buf::put_str(out, &self.uri);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let prefix = cur.string()?;
        let local = cur.string()?;
        let uri = cur.string()?;
        Ok(Self { local, prefix, uri })
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{}:{}", self.prefix, self.local)
        }
    }
}
