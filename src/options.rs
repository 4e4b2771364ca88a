//! Resource configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::StorageMetrics;

/// Where a resource keeps its pages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKind {
    /// Pages live in memory and vanish with the process.
    Memory,
    /// Append-only page file plus uber pointer file inside `path`.
    File {
        /// Resource directory.
        path: PathBuf,
    },
}

/// Structural hashing mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    /// Nodes carry no hash.
    None,
    /// Every node carries a hash of its subtree, recomputed before commit.
    Structural,
}

/// Options supplied when opening a [`crate::ResourceManager`].
#[derive(Clone)]
pub struct ResourceOptions {
    /// Storage backend.
    pub storage: StorageKind,
    /// Structural hashing mode.
    pub hash_kind: HashKind,
    /// Page cache capacity per transaction.
    pub cache_pages: usize,
    /// Whether page checksums are verified on every read.
    pub verify_checksums: bool,
    /// Seed for value hashing.
    pub hash_seed: u64,
    /// Values longer than this many bytes are stored snappy-compressed.
    pub compress_values_over: Option<usize>,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn StorageMetrics>>,
}

impl fmt::Debug for ResourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceOptions")
            .field("storage", &self.storage)
            .field("hash_kind", &self.hash_kind)
            .field("cache_pages", &self.cache_pages)
            .field("verify_checksums", &self.verify_checksums)
            .field("hash_seed", &self.hash_seed)
            .field("compress_values_over", &self.compress_values_over)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            storage: StorageKind::Memory,
            hash_kind: HashKind::Structural,
            cache_pages: 256,
            verify_checksums: true,
            hash_seed: 0,
            compress_values_over: None,
            metrics: None,
        }
    }
}

impl ResourceOptions {
    /// In-memory resource with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed resource rooted at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageKind::File { path: path.into() },
            ..Self::default()
        }
    }

    /// Sets the hashing mode.
    pub fn with_hash_kind(mut self, hash_kind: HashKind) -> Self {
        self.hash_kind = hash_kind;
        self
    }

    /// Sets the seed of name and value digests.
    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    /// Sets the per-transaction page cache capacity.
    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Enables value compression above `threshold` bytes.
    pub fn with_compression_over(mut self, threshold: usize) -> Self {
        self.compress_values_over = Some(threshold);
        self
    }

    /// Installs a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parses options from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, OptionsError> {
        let raw: RawOptions = toml::from_str(contents).map_err(OptionsError::Parse)?;
        raw.into_options()
    }

    /// Reads options from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, OptionsError> {
        let contents = fs::read_to_string(path).map_err(|source| OptionsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    storage: Option<StorageKind>,
    hash_kind: Option<HashKind>,
    cache_pages: Option<usize>,
    verify_checksums: Option<bool>,
    hash_seed: Option<u64>,
    compress_values_over: Option<usize>,
}

impl RawOptions {
    fn into_options(self) -> Result<ResourceOptions, OptionsError> {
        let defaults = ResourceOptions::default();
        let cache_pages = self.cache_pages.unwrap_or(defaults.cache_pages);
        if cache_pages == 0 {
            return Err(OptionsError::Invalid {
                field: "cache_pages",
                reason: "must be greater than zero",
            });
        }
        Ok(ResourceOptions {
            storage: self.storage.unwrap_or(defaults.storage),
            hash_kind: self.hash_kind.unwrap_or(defaults.hash_kind),
            cache_pages,
            verify_checksums: self.verify_checksums.unwrap_or(defaults.verify_checksums),
            hash_seed: self.hash_seed.unwrap_or(defaults.hash_seed),
            compress_values_over: self.compress_values_over,
            metrics: None,
        })
    }
}

/// Failure loading [`ResourceOptions`].
#[derive(Debug, Error)]
pub enum OptionsError {
    /// The options file could not be read.
    #[error("failed to read options from {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML text is malformed or has unknown keys.
    #[error("failed to parse options: {0}")]
    Parse(#[source] toml::de::Error),
    /// A value is out of range.
    #[error("invalid option {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
