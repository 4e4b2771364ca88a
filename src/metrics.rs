//! Storage counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks invoked by transactions and storage backends.
pub trait StorageMetrics: Send + Sync {
    /// A page was fetched from the storage backend.
    fn page_read(&self);
    /// A page was served from a transaction's page cache.
    fn page_cache_hit(&self);
    /// A page was serialized and written by the storage backend.
    fn page_written(&self, bytes: usize);
    /// A write transaction cloned a committed page into its page log.
    fn page_cloned(&self);
    /// A write transaction committed.
    fn commit(&self);
    /// A write transaction was aborted or dropped without commit.
    fn abort(&self);
}

/// Discards every event.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn page_read(&self) {}
    fn page_cache_hit(&self) {}
    fn page_written(&self, _bytes: usize) {}
    fn page_cloned(&self) {}
    fn commit(&self) {}
    fn abort(&self) {}
}

/// Atomic counters for every event.
#[derive(Default)]
pub struct CounterMetrics {
    /// Pages fetched from storage.
    pub pages_read: AtomicU64,
    /// Page cache hits.
    pub cache_hits: AtomicU64,
    /// Pages written.
    pub pages_written: AtomicU64,
    /// Bytes written, excluding record framing.
    pub bytes_written: AtomicU64,
    /// Copy-on-write clones.
    pub pages_cloned: AtomicU64,
    /// Committed write transactions.
    pub commits: AtomicU64,
    /// Aborted write transactions.
    pub aborts: AtomicU64,
}

impl StorageMetrics for CounterMetrics {
    fn page_read(&self) {
        self.pages_read.fetch_add(1, Ordering::Relaxed);
    }

    fn page_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn page_written(&self, bytes: usize) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn page_cloned(&self) {
        self.pages_cloned.fetch_add(1, Ordering::Relaxed);
    }

    fn commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the metrics sink used when none is configured.
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
