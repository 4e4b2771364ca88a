#![forbid(unsafe_code)]
//! Identifier newtypes, the crate error type and page checksums.

use std::fmt;

mod checksum;

pub use checksum::{page_crc32, pointer_crc32};

/// Key of a record (document node, path node or AVL node) inside one record tree.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeKey(pub u64);

/// Durable key assigned to a page by the storage backend.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageKey(pub u64);

/// Revision number. Revision 0 is the bootstrap revision created with the resource.
pub type Revision = u32;

/// Path-class record: the key of a path summary node.
pub type Pcr = u64;

impl NodeKey {
    /// Key of the document root in the document tree and of the root in the path summary.
    pub const ROOT: NodeKey = NodeKey(0);
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeKey {
    fn from(value: u64) -> Self {
        NodeKey(value)
    }
}

impl From<NodeKey> for u64 {
    fn from(value: NodeKey) -> Self {
        value.0
    }
}

/// Errors raised by the store.
#[derive(thiserror::Error, Debug)]
pub enum PalimpsestError {
    /// Storage read or write failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Corrupt page, checksum mismatch or violated structural invariant.
    #[error("consistency: {0}")]
    Consistency(String),
    /// Programming error, for instance removing an index key that does not exist.
    #[error("usage: {0}")]
    Usage(String),
    /// A second write transaction was requested while one is open.
    #[error("concurrency: {0}")]
    Concurrency(&'static str),
    /// Requested revision, page or record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PalimpsestError>;
