use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::filenames;
use crate::mmap::MmapFile;
use crate::page::{Page, PageRef};
use crate::{Error, Result};

const OS_PAGE_SIZE: usize = 4096;

/// Creates and maps page files; holds no state beyond the directory.
pub struct PageAllocator {
    path: PathBuf,
    page_size: u32,
    prefault: bool,
    created: AtomicU64,
}

impl PageAllocator {
    pub fn new(path: impl Into<PathBuf>, page_size: u32, prefault: bool) -> Self {
        Self {
            path: path.into(),
            page_size,
            prefault,
            created: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of page files this allocator has published.
    pub fn pages_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Maps page `page_number`, creating its file first if it does not exist.
    ///
    /// Racing allocators for the same number agree on a single file: the file
    /// is sized under a temporary name and published with a no-replace rename,
    /// and the loser maps the winner's file.
    pub fn safely_allocate_page(&self, page_number: u32) -> Result<PageRef> {
        match self.load_existing(page_number) {
            Ok(page) => return Ok(page),
            Err(Error::PageNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let temp = filenames::temp_path(page_number, &self.path);
        let final_path = filenames::for_page_number(page_number, &self.path);
        let mmap = match MmapFile::create_new(&temp, self.page_size as usize) {
            Ok(mmap) => mmap,
            Err(err) => {
                let _ = std::fs::remove_file(&temp);
                return Err(err);
            }
        };
        if self.prefault {
            prefault_mmap(&mmap);
        }
        match publish_page(&temp, &final_path) {
            Ok(()) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                log::debug!("allocated page {} at {}", page_number, final_path.display());
                Page::from_mapping(page_number, mmap)
            }
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                log::warn!("page {} published concurrently, mapping existing file", page_number);
                drop(mmap);
                let _ = std::fs::remove_file(&temp);
                self.load_existing(page_number)
            }
            Err(err) => {
                let _ = std::fs::remove_file(&temp);
                Err(err)
            }
        }
    }

    /// Maps an already published page file for appending, recovering its
    /// write cursor.
    pub fn load_existing(&self, page_number: u32) -> Result<PageRef> {
        Page::from_mapping(page_number, self.open_page_file(page_number)?)
    }

    /// Maps an already published page file for reading only.
    pub fn map_existing(&self, page_number: u32) -> Result<PageRef> {
        Page::for_reading(page_number, self.open_page_file(page_number)?)
    }

    fn open_page_file(&self, page_number: u32) -> Result<MmapFile> {
        let path = filenames::for_page_number(page_number, &self.path);
        let mmap = match MmapFile::open(&path) {
            Ok(mmap) => mmap,
            Err(err) if err.is_not_found() => return Err(Error::PageNotFound(page_number)),
            Err(err) => return Err(err),
        };
        if mmap.len() != self.page_size as usize {
            return Err(Error::Corrupt("page size mismatch"));
        }
        Ok(mmap)
    }
}

/// Touches every OS page of the mapping so first writes do not fault.
pub fn prefault_mmap(mmap: &MmapFile) {
    let base = mmap.as_mut_ptr();
    let mut offset = 0;
    while offset < mmap.len() {
        // SAFETY: offset is inside the mapping, which nothing else has seen yet.
        unsafe { std::ptr::write_volatile(base.add(offset), 0) };
        offset += OS_PAGE_SIZE;
    }
}

/// Renames `temp` to `final_path` unless `final_path` already exists.
pub fn publish_page(temp: &Path, final_path: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        let temp_c = CString::new(temp.as_os_str().as_bytes())
            .map_err(|_| Error::Unsupported("page temp path contains null byte"))?;
        let final_c = CString::new(final_path.as_os_str().as_bytes())
            .map_err(|_| Error::Unsupported("page path contains null byte"))?;
        let rc = unsafe {
            libc::renameat2(
                libc::AT_FDCWD,
                temp_c.as_ptr(),
                libc::AT_FDCWD,
                final_c.as_ptr(),
                libc::RENAME_NOREPLACE,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOSYS) && err.raw_os_error() != Some(libc::EINVAL) {
            return Err(Error::Io(err));
        }
    }

    if final_path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "page already exists",
        )));
    }
    std::fs::rename(temp, final_path)?;
    Ok(())
}
