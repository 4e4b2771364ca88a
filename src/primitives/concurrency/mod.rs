#![forbid(unsafe_code)]
//! Single-writer admission and reader accounting for one resource.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;

use crate::types::{PalimpsestError, Result};

/// Single-writer, multiple-reader coordinator.
///
/// Readers never wait: they only bump a counter. Writer admission fails
/// immediately instead of blocking when a writer is already registered.
/// With a [`LockFile`] attached, the writer slot is also claimed on disk so
/// that other handles on the same resource, in this process or another one,
/// are refused as well.
#[derive(Clone, Default)]
pub struct SingleWriter {
    inner: Arc<Mutex<LockState>>,
    file: Option<LockFile>,
}

#[derive(Default, Debug)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of open read transactions.
    pub readers: u32,
    /// Whether the write transaction slot is taken.
    pub writer: bool,
}

/// Held while a read transaction is open.
pub struct ReaderGuard {
    inner: Arc<Mutex<LockState>>,
}

/// Held while the write transaction is open.
pub struct WriterGuard {
    inner: Arc<Mutex<LockState>>,
    _file: Option<LockFileGuard>,
}

impl SingleWriter {
    /// Creates a coordinator with no open transactions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator that also claims `file` for every writer.
    pub fn with_lock_file(file: LockFile) -> Self {
        Self {
            inner: Arc::default(),
            file: Some(file),
        }
    }

    /// Registers a reader.
    pub fn acquire_reader(&self) -> ReaderGuard {
        self.inner.lock().readers += 1;
        ReaderGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Registers the writer, failing with a concurrency fault if one is open
    /// here or through another handle on the lock file.
    pub fn acquire_writer(&self) -> Result<WriterGuard> {
        let mut state = self.inner.lock();
        if state.writer {
            return Err(PalimpsestError::Concurrency("write transaction already open"));
        }
        let file = match &self.file {
            Some(file) => Some(file.try_exclusive()?.ok_or(PalimpsestError::Concurrency(
                "write transaction open in another handle",
            ))?),
            None => None,
        };
        state.writer = true;
        Ok(WriterGuard {
            inner: Arc::clone(&self.inner),
            _file: file,
        })
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.inner.lock();
        LockSnapshot {
            readers: state.readers,
            writer: state.writer,
        }
    }
}

/// Advisory lock file shared by every handle on one resource directory.
///
/// Locks are taken per open file description, so two handles in the same
/// process exclude each other just like two processes do.
#[derive(Clone)]
pub struct LockFile {
    file: Arc<File>,
    path: PathBuf,
}

/// Exclusive claim on a [`LockFile`], released on drop.
pub struct LockFileGuard {
    file: Arc<File>,
}

impl LockFile {
    /// Opens or creates the lock file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claims the file without waiting; `None` while another handle holds it.
    pub fn try_exclusive(&self) -> Result<Option<LockFileGuard>> {
        match FileExt::try_lock_exclusive(self.file.as_ref()) {
            Ok(()) => Ok(Some(LockFileGuard {
                file: Arc::clone(&self.file),
            })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(PalimpsestError::from(err)),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        if let Err(_err) = FileExt::unlock(self.file.as_ref()) {
            #[cfg(debug_assertions)]
            eprintln!("failed to release lock file: {_err:?}");
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.readers = state.readers.saturating_sub(1);
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.inner.lock().writer = false;
    }
}
