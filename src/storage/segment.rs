//! Flat-file storage for one chain segment
//!
//! A segment file holds contiguous 80-byte header records. Record `i`
//! belongs to height `checkpoint + i`; the checkpoint itself is tracked by
//! the owner of the file.

use crate::core::block::BLOCK_HEADER_SIZE;
use log::warn;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const RECORD_SIZE: u64 = BLOCK_HEADER_SIZE as u64;

/// File name of the root segment inside the headers directory
pub const ROOT_FILE_NAME: &str = "blockchain_headers";

/// Directory holding fork segments inside the headers directory
pub const FORKS_DIR_NAME: &str = "forks";

/// Storage location for a segment: fixed for the root, derived from
/// `(parent_checkpoint, checkpoint)` for forks.
pub fn segment_path(headers_dir: &Path, parent_checkpoint: Option<u64>, checkpoint: u64) -> PathBuf {
    match parent_checkpoint {
        None => headers_dir.join(ROOT_FILE_NAME),
        Some(parent) => headers_dir
            .join(FORKS_DIR_NAME)
            .join(format!("fork_{}_{}", parent, checkpoint)),
    }
}

/// Parse `fork_<parent>_<checkpoint>` into its two checkpoints
pub fn parse_fork_file_name(name: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix("fork_")?;
    let (parent, checkpoint) = rest.split_once('_')?;
    Some((parent.parse().ok()?, checkpoint.parse().ok()?))
}

#[derive(Debug)]
struct FileState {
    path: PathBuf,
    size: u64,
}

impl FileState {
    fn update_size(&mut self) -> io::Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if len % RECORD_SIZE != 0 {
            warn!(
                "{} has {} trailing bytes past the last whole header",
                self.path.display(),
                len % RECORD_SIZE
            );
        }
        self.size = len / RECORD_SIZE;
        Ok(())
    }
}

/// Lock-guarded backing file of a chain segment.
///
/// Every mutation of the file and of the cached record count goes through
/// the same mutex.
#[derive(Debug)]
pub struct SegmentFile {
    state: Mutex<FileState>,
}

impl SegmentFile {
    /// Bind to an existing (or not yet created) file
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let mut state = FileState { path, size: 0 };
        state.update_size()?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Create (or empty) the file and bind to it
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        File::create(&path)?;
        Ok(Self {
            state: Mutex::new(FileState { path, size: 0 }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of whole records stored
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Point at a different file, e.g. after a rename or a swap
    pub fn set_path(&self, path: PathBuf) -> io::Result<()> {
        let mut state = self.lock();
        state.path = path;
        state.update_size()
    }

    /// Recompute the record count from the file length
    pub fn update_size(&self) -> io::Result<()> {
        self.lock().update_size()
    }

    /// Read record `delta`. All-zero records and records past the end read
    /// as `None`.
    pub fn read_record(&self, delta: u64) -> io::Result<Option<[u8; BLOCK_HEADER_SIZE]>> {
        let state = self.lock();
        if delta >= state.size {
            return Ok(None);
        }
        let mut file = match File::open(&state.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        file.seek(SeekFrom::Start(delta * RECORD_SIZE))?;
        let mut record = [0u8; BLOCK_HEADER_SIZE];
        match file.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        if record.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Read `len` bytes starting at `offset`, or fewer if the file ends first
    pub fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let state = self.lock();
        let mut file = File::open(&state.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::new();
        file.take(len).read_to_end(&mut data)?;
        Ok(data)
    }

    /// Entire file contents
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let state = self.lock();
        fs::read(&state.path)
    }

    /// Write `data` at byte `offset`.
    ///
    /// With `truncate`, anything at or past `offset` is discarded first unless
    /// the offset is exactly the current end. Data is synced before the lock
    /// is released.
    pub fn write(&self, data: &[u8], offset: u64, truncate: bool) -> io::Result<()> {
        let mut state = self.lock();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&state.path)?;
        if truncate && offset != state.size * RECORD_SIZE {
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_all()?;
        state.update_size()
    }
}
