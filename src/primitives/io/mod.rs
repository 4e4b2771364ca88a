#![forbid(unsafe_code)]
//! Positioned file I/O used by the file storage backend.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::types::{PalimpsestError, Result};

/// Positioned reads and writes over a single file.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` starting at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// [`FileIo`] over a shared std [`File`].
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens (creating if needed) a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(PalimpsestError::from)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn pread(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        while !dst.is_empty() {
            let read = self.inner.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn pwrite(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        while !src.is_empty() {
            let written = self.inner.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn pread(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !dst.is_empty() {
            let read = self.inner.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn pwrite(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !src.is_empty() {
            let written = self.inner.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn pread(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "positioned reads unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn pwrite(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "positioned writes unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.pread(off, dst).map_err(PalimpsestError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.pwrite(off, src).map_err(PalimpsestError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(PalimpsestError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(PalimpsestError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        io.write_at(4, b"revision").unwrap();
        io.sync_all().unwrap();

        let mut buf = [0u8; 8];
        io.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"revision");
        assert_eq!(io.len().unwrap(), 12);
    }

    #[test]
    fn read_past_eof_is_io_error() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf).unwrap_err() {
            PalimpsestError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        io.write_at(0, &[7u8; 64]).unwrap();
        io.truncate(16).unwrap();
        assert_eq!(io.len().unwrap(), 16);
        assert!(!io.is_empty().unwrap());
    }
}
