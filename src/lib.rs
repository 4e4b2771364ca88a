//! Temporal, tree-structured document store core.
//!
//! Every commit produces a new immutable revision of a document tree, and
//! every earlier revision stays readable. Revisions share unchanged pages
//! through a copy-on-write page graph; secondary indexes are persistent AVL
//! trees living in that same page graph; structural hashes let callers
//! detect which subtrees changed between revisions.
//!
//! Start with [`ResourceManager`]: it opens a storage backend, hands out
//! [`NodeReadTrx`] cursors pinned to one revision and the single
//! [`NodeWriteTrx`] building the next one.

#![forbid(unsafe_code)]

pub mod index;
pub mod metrics;
pub mod node;
pub mod options;
pub mod page;
pub mod primitives;
pub mod summary;
pub mod trx;
pub mod types;

pub use index::{
    Atomic, CasFilter, CasFilterRange, ContentType, IndexDef, IndexType, NameFilter,
    NodeReferences, PathFilter, SearchMode,
};
pub use node::{NodeReadTrx, NodeReader, NodeWriteTrx, QName};
pub use options::{HashKind, OptionsError, ResourceOptions, StorageKind};
pub use summary::Path;
pub use trx::{PageReadTrx, PageWriteTrx, RecordReader, ResourceManager};
pub use types::{NodeKey, PalimpsestError, Pcr, Result, Revision};
