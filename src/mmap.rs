use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{MmapOptions, MmapRaw};

use crate::{Error, Result};

/// A file mapped shared and read-write.
///
/// The mapping is exposed as a raw base pointer so that a single writer and
/// any number of readers can address it concurrently; callers coordinate
/// through atomics stored inside the mapped bytes.
pub struct MmapFile {
    file: File,
    map: MmapRaw,
    len: usize,
}

impl MmapFile {
    /// Creates `path`, failing with `AlreadyExists` if it is present, and maps
    /// it at `len` zeroed bytes.
    pub fn create_new(path: &Path, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::Unsupported("mmap length must be non-zero"));
        }
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let map = MmapOptions::new().len(len).map_raw(&file)?;
        Ok(Self { file, map, len })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(Error::Unsupported("mmap length must be non-zero"));
        }
        let map = MmapOptions::new().len(len).map_raw(&file)?;
        Ok(Self { file, map, len })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn flush_async(&self) -> Result<()> {
        self.map.flush_async()?;
        Ok(())
    }

    pub fn flush_sync(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}
