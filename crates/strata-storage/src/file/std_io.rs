//! File-backed block store using standard library I/O.
//!
//! Positioned reads and writes go through a seek on a mutex-guarded file
//! handle, which works on every supported platform.

use std::fs::{File as StdFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use strata_common::types::BlockAddress;
use tracing::debug;

use super::error::{IoError, IoResult};
use super::store::BlockStore;

/// Block store backed by a single file.
///
/// Block `n` occupies bytes `[n * block_size, (n + 1) * block_size)`.
/// Writing past the end of the file grows it.
pub struct FileBlockStore {
    /// The underlying file, wrapped in a mutex for thread-safe access.
    file: Mutex<StdFile>,
    /// The file path.
    path: PathBuf,
    /// Block size in bytes.
    block_size: usize,
    /// Number of whole blocks in the file.
    block_count: AtomicU64,
    /// Whether the file was opened with write access.
    writable: bool,
}

impl FileBlockStore {
    /// Opens or creates a block file for reading and writing.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> IoResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| IoError::from_io_with_path(e, path))?;
        Self::from_file(file, path, block_size, true)
    }

    /// Opens an existing block file read-only.
    pub fn open_read_only(path: impl AsRef<Path>, block_size: usize) -> IoResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| IoError::from_io_with_path(e, path))?;
        Self::from_file(file, path, block_size, false)
    }

    fn from_file(file: StdFile, path: &Path, block_size: usize, writable: bool) -> IoResult<Self> {
        let len = file.metadata()?.len();
        let block_count = len / block_size as u64;
        debug!(path = %path.display(), block_size, block_count, "opened block file");
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            block_size,
            block_count: AtomicU64::new(block_count),
            writable,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(&self, address: BlockAddress) -> IoResult<u64> {
        address
            .byte_offset(self.block_size)
            .ok_or(IoError::AddressOutOfRange {
                address,
                block_size: self.block_size,
            })
    }

    fn check_len(&self, len: usize) -> IoResult<()> {
        if len == self.block_size {
            Ok(())
        } else {
            Err(IoError::block_size_mismatch(self.block_size, len))
        }
    }
}

impl BlockStore for FileBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Acquire)
    }

    fn read_block(&self, address: BlockAddress, buf: &mut [u8]) -> IoResult<usize> {
        self.check_len(buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset_of(address)?))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn write_block(&self, address: BlockAddress, buf: &[u8]) -> IoResult<()> {
        if !self.writable {
            return Err(IoError::ReadOnly);
        }
        self.check_len(buf.len())?;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.offset_of(address)?))?;
            file.write_all(buf)?;
        }
        self.block_count
            .fetch_max(address.as_u64().saturating_add(1), Ordering::AcqRel);
        Ok(())
    }

    fn extend(&self, additional: u64) -> IoResult<u64> {
        if !self.writable {
            return Err(IoError::ReadOnly);
        }
        let file = self.file.lock();
        let new_count = self.block_count().saturating_add(additional);
        file.set_len(new_count.saturating_mul(self.block_size as u64))?;
        self.block_count.store(new_count, Ordering::Release);
        Ok(new_count)
    }

    fn sync(&self) -> IoResult<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlockStore")
            .field("path", &self.path)
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count())
            .field("writable", &self.writable)
            .finish()
    }
}
