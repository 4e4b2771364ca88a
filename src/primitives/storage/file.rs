use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::{default_metrics, StorageMetrics};
use crate::page::{encode_page, Page, PageReference};
use crate::primitives::concurrency::LockFile;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{page_crc32, pointer_crc32, PageKey, PalimpsestError, Result, Revision};

use super::{decode_verified, ensure_uber, locate_uber_page, verified_key, Storage};

const DATA_FILE: &str = "pages.dat";
const POINTER_FILE: &str = "uber.ptr";
const LOCK_FILE: &str = "LOCK";
const DATA_MAGIC: [u8; 8] = *b"PLMPDAT1";
const POINTER_MAGIC: [u8; 8] = *b"PLMPUBR1";
const FRAME_HEADER_LEN: u64 = 4;

/// Append-only page file plus an uber pointer file.
///
/// Every page is appended as `[len: u32 BE][image]` and its key is the
/// frame offset, so keys grow with every write. The pointer file names the
/// newest uber page and is replaced atomically once the data file has been
/// synced. Frames behind the newest uber page belong to a commit that never
/// completed and are cut off when the resource is opened or a writer
/// claims the `LOCK` file.
pub struct FileStorage {
    dir: PathBuf,
    io: Arc<dyn FileIo>,
    pointer: UberPointer,
    lock: LockFile,
    state: Mutex<FileState>,
    verify_checksums: bool,
    metrics: Arc<dyn StorageMetrics>,
}

struct FileState {
    end: u64,
    uber: Option<PageReference>,
}

impl FileStorage {
    /// Opens or creates the resource directory `dir`.
    ///
    /// An uncommitted tail is only cut off when no other handle holds the
    /// writer lock; otherwise it may belong to a commit still in flight.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let lock = LockFile::open(dir.join(LOCK_FILE))?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.join(DATA_FILE))?);
        if io.is_empty()? {
            io.write_at(0, &DATA_MAGIC)?;
            io.sync_all()?;
        } else {
            let mut magic = [0u8; 8];
            io.read_at(0, &mut magic)?;
            if magic != DATA_MAGIC {
                return Err(PalimpsestError::Consistency(format!(
                    "{} is not a page file",
                    dir.join(DATA_FILE).display()
                )));
            }
        }
        let pointer = UberPointer::new(dir.join(POINTER_FILE));
        let state = committed_state(io.as_ref(), &pointer)?;
        if let Some(_claim) = lock.try_exclusive()? {
            discard_tail(io.as_ref(), state.end, &dir)?;
        }
        info!(
            dir = %dir.display(),
            end = state.end,
            committed = state.uber.is_some(),
            "storage.file.open"
        );
        Ok(Self {
            dir,
            io,
            pointer,
            lock,
            state: Mutex::new(state),
            verify_checksums: true,
            metrics: default_metrics(),
        })
    }

    /// Enables or disables checksum verification on read.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Installs a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Resource directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_frame(&self, key: PageKey) -> Result<Vec<u8>> {
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        self.io.read_at(key.0, &mut header)?;
        let len = u32::from_be_bytes(header) as usize;
        let mut image = vec![0u8; len];
        self.io.read_at(key.0 + FRAME_HEADER_LEN, &mut image)?;
        Ok(image)
    }
}

fn committed_state(io: &dyn FileIo, pointer: &UberPointer) -> Result<FileState> {
    let uber = pointer.read()?;
    let end = match uber {
        Some(reference) => frame_end(io, verified_key(&reference)?)?,
        None => DATA_MAGIC.len() as u64,
    };
    Ok(FileState { end, uber })
}

fn discard_tail(io: &dyn FileIo, end: u64, dir: &Path) -> Result<()> {
    let len = io.len()?;
    if len > end {
        warn!(
            dir = %dir.display(),
            discarded = len - end,
            "storage.file.discard_uncommitted_tail"
        );
        io.truncate(end)?;
        io.sync_all()?;
    }
    Ok(())
}

fn frame_end(io: &dyn FileIo, key: PageKey) -> Result<u64> {
    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    io.read_at(key.0, &mut header)?;
    Ok(key.0 + FRAME_HEADER_LEN + u64::from(u32::from_be_bytes(header)))
}

impl Storage for FileStorage {
    fn read(&self, reference: &PageReference) -> Result<Page> {
        let key = verified_key(reference)?;
        if key.0 < DATA_MAGIC.len() as u64 || key.0 >= self.state.lock().end {
            return Err(PalimpsestError::NotFound("page"));
        }
        let image = self.read_frame(key)?;
        decode_verified(
            reference,
            key,
            &image,
            self.verify_checksums,
            self.metrics.as_ref(),
        )
    }

    fn read_uber_page_reference(&self) -> Result<Option<PageReference>> {
        Ok(self.state.lock().uber)
    }

    fn write(&self, reference: &mut PageReference, page: &Page) -> Result<()> {
        let image = encode_page(page)?;
        let len = u32::try_from(image.len())
            .map_err(|_| PalimpsestError::Usage("page image exceeds 4 GiB".into()))?;
        let mut frame = Vec::with_capacity(image.len() + FRAME_HEADER_LEN as usize);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&image);

        let mut state = self.state.lock();
        let key = PageKey(state.end);
        self.io.write_at(key.0, &frame)?;
        state.end += frame.len() as u64;
        self.metrics.page_written(image.len());
        reference.set_persisted(key, page_crc32(key.0, &image));
        Ok(())
    }

    fn write_uber_page_reference(
        &self,
        reference: &mut PageReference,
        page: &Page,
    ) -> Result<()> {
        ensure_uber(page)?;
        self.write(reference, page)?;
        self.io.sync_all()?;
        self.pointer.persist(reference)?;
        self.state.lock().uber = Some(*reference);
        debug!(key = ?reference.key(), "storage.file.uber_pointer_advanced");
        Ok(())
    }

    fn truncate_to(&self, revision: Revision) -> Result<()> {
        let target = locate_uber_page(self, revision)?;
        let key = verified_key(&target)?;
        let end = frame_end(self.io.as_ref(), key)?;
        self.pointer.persist(&target)?;
        let mut state = self.state.lock();
        self.io.truncate(end)?;
        self.io.sync_all()?;
        state.end = end;
        state.uber = Some(target);
        info!(revision, end, "storage.file.truncate");
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.state.lock().uber.is_some())
    }

    fn lock_file(&self) -> Option<LockFile> {
        Some(self.lock.clone())
    }

    fn refresh(&self) -> Result<()> {
        let committed = committed_state(self.io.as_ref(), &self.pointer)?;
        let mut state = self.state.lock();
        if committed.uber != state.uber {
            debug!(end = committed.end, "storage.file.refresh");
            *state = committed;
        }
        Ok(())
    }

    fn recover(&self) -> Result<()> {
        let committed = committed_state(self.io.as_ref(), &self.pointer)?;
        let mut state = self.state.lock();
        discard_tail(self.io.as_ref(), committed.end, &self.dir)?;
        *state = committed;
        Ok(())
    }
}

/// Durable pointer to the newest uber page.
#[derive(Debug, Clone)]
struct UberPointer {
    path: PathBuf,
}

impl UberPointer {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<Option<PageReference>> {
        let mut buf = [0u8; 24];
        match File::open(&self.path) {
            Ok(mut file) => file.read_exact(&mut buf)?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PalimpsestError::from(err)),
        }
        if buf[..8] != POINTER_MAGIC {
            return Err(PalimpsestError::Consistency("uber pointer magic mismatch".into()));
        }
        let mut key = [0u8; 8];
        key.copy_from_slice(&buf[8..16]);
        let key = u64::from_be_bytes(key);
        let hash = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let crc = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        if crc != pointer_crc32(key, hash) {
            return Err(PalimpsestError::Consistency("uber pointer checksum mismatch".into()));
        }
        Ok(Some(PageReference::persisted(PageKey(key), hash)))
    }

    fn persist(&self, reference: &PageReference) -> Result<()> {
        let key = verified_key(reference)?;
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&POINTER_MAGIC)?;
            file.write_all(&key.0.to_be_bytes())?;
            file.write_all(&reference.hash().to_be_bytes())?;
            file.write_all(&pointer_crc32(key.0, reference.hash()).to_be_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
