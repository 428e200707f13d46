//! File-backed persistent region.

use crate::error::{PmemError, PmemResult};
use crate::ptr::PAddr;
use crate::region::{check_range, PersistentMemory};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A persistent region backed by a file.
///
/// The region is loaded into memory on open. Stores only touch the
/// in-memory image; `flush` writes the flushed range back to the file at
/// the same offset and `fence` calls `sync_data`, so the file holds exactly
/// what a crash would leave behind.
///
/// # Locking
///
/// The file is locked exclusively for the lifetime of the region. Opening
/// it a second time, from this or another process, fails with
/// [`PmemError::Locked`].
///
/// # Example
///
/// ```no_run
/// use undolog_pmem::{FileRegion, PAddr, PersistentMemory};
/// use std::path::Path;
///
/// let region = FileRegion::create(Path::new("app.pool"), 1 << 20).unwrap();
/// region.write(PAddr::new(64), b"durable").unwrap();
/// region.flush(PAddr::new(64), 7).unwrap();
/// region.fence().unwrap();
/// ```
#[derive(Debug)]
pub struct FileRegion {
    path: PathBuf,
    file: Mutex<File>,
    image: RwLock<Vec<u8>>,
}

impl FileRegion {
    /// Creates a new zeroed region file of `size` bytes, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, sized or locked.
    pub fn create(path: &Path, size: u64) -> PmemResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::lock(&file)?;
        file.set_len(size)?;
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            image: RwLock::new(vec![0u8; size as usize]),
        })
    }

    /// Opens an existing region file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be read or is locked.
    pub fn open(path: &Path) -> PmemResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::lock(&file)?;

        let mut image = Vec::with_capacity(file.metadata()?.len() as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut image)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            image: RwLock::new(image),
        })
    }

    /// Opens the region file if it exists, otherwise creates it with `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open_or_create(path: &Path, size: u64) -> PmemResult<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, size)
        }
    }

    /// Returns the path to the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(file: &File) -> PmemResult<()> {
        file.try_lock_exclusive().map_err(|_| PmemError::Locked)
    }
}

impl PersistentMemory for FileRegion {
    fn read_into(&self, addr: PAddr, buf: &mut [u8]) -> PmemResult<()> {
        let image = self.image.read();
        let range = check_range(addr, buf.len(), image.len() as u64)?;
        buf.copy_from_slice(&image[range]);
        Ok(())
    }

    fn write(&self, addr: PAddr, data: &[u8]) -> PmemResult<()> {
        let mut image = self.image.write();
        let range = check_range(addr, data.len(), image.len() as u64)?;
        image[range].copy_from_slice(data);
        Ok(())
    }

    fn copy(&self, src: PAddr, dst: PAddr, len: usize) -> PmemResult<()> {
        let mut image = self.image.write();
        let size = image.len() as u64;
        let from = check_range(src, len, size)?;
        let to = check_range(dst, len, size)?;
        image.copy_within(from, to.start);
        Ok(())
    }

    fn flush(&self, addr: PAddr, len: usize) -> PmemResult<()> {
        if len == 0 {
            return Ok(());
        }
        let image = self.image.read();
        let range = check_range(addr, len, image.len() as u64)?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(addr.as_u64()))?;
        file.write_all(&image[range])?;
        Ok(())
    }

    fn fence(&self) -> PmemResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.image.read().len() as u64
    }
}
