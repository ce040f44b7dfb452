//! Memory-mapped summary of which page numbers exist.
//!
//! `pages.idx` holds 128 little-endian `i32` slots. Slot `n & 127` keeps the
//! highest page number observed for that residue, so existence checks are a
//! single load and min/max discovery never lists the directory. Once more
//! than 128 pages exist, older pages alias newer ones and report absent; the
//! directory stays authoritative.

use std::path::{Path, PathBuf};

use crate::filenames;
use crate::mmap::MmapFile;
use crate::slab::Slab;
use crate::{Error, Result};

pub const SLOTS: usize = 128;
const SLOT_MASK: u32 = SLOTS as u32 - 1;
const SLOT_SIZE: usize = 4;
pub const FILE_SIZE: usize = SLOTS * SLOT_SIZE;

pub struct PageIndex {
    slab: Slab,
    path: PathBuf,
}

impl PageIndex {
    /// Opens (creating if needed) the index for the buffer in `path`, then
    /// replays every page file found there.
    pub fn for_page_cache(path: &Path) -> Result<Self> {
        let index_file = path.join(filenames::INDEX_FILE);
        let slab = match MmapFile::create_new(&index_file, FILE_SIZE) {
            Ok(mmap) => Slab::new(mmap),
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Slab::map(&index_file)?
            }
            Err(err) => return Err(err),
        };
        if slab.len() != FILE_SIZE {
            return Err(Error::Corrupt("page index size mismatch"));
        }
        let index = Self {
            slab,
            path: path.to_path_buf(),
        };
        index.refresh()?;
        Ok(index)
    }

    /// Maps an index that already exists without creating or refreshing it.
    pub fn open_existing(path: &Path) -> Result<Option<Self>> {
        let index_file = path.join(filenames::INDEX_FILE);
        let slab = match Slab::map(&index_file) {
            Ok(slab) => slab,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if slab.len() != FILE_SIZE {
            return Err(Error::Corrupt("page index size mismatch"));
        }
        Ok(Some(Self {
            slab,
            path: path.to_path_buf(),
        }))
    }

    pub fn refresh(&self) -> Result<()> {
        let pages = filenames::discover_pages(&self.path)?;
        for &page_number in &pages {
            self.on_page_created(page_number);
        }
        log::debug!(
            "page index refreshed from {} page files in {}",
            pages.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Records `page_number` if it is higher than what its slot holds.
    pub fn on_page_created(&self, page_number: u32) {
        let offset = to_offset(page_number);
        let value = page_number as i32;
        loop {
            let recorded = self.slab.get_int_volatile(offset);
            if value <= recorded || self.slab.compare_and_set_int(offset, recorded, value) {
                return;
            }
        }
    }

    pub fn is_page_created(&self, page_number: u32) -> bool {
        self.slab.get_int_volatile(to_offset(page_number)) == page_number as i32
    }

    pub fn is_less_than_lowest_tracked_page_number(&self, page_number: u32) -> bool {
        (page_number as i64) < self.lowest_tracked_page_number() as i64
    }

    pub fn lowest_tracked_page_number(&self) -> i32 {
        (0..SLOTS as u32)
            .map(|slot| self.slab.get_int_volatile(to_offset(slot)))
            .min()
            .unwrap_or(i32::MAX)
    }

    pub fn highest_page_number(&self) -> i32 {
        (0..SLOTS as u32)
            .map(|slot| self.slab.get_int_volatile(to_offset(slot)))
            .max()
            .unwrap_or(-1)
    }
}

fn to_offset(page_number: u32) -> usize {
    SLOT_SIZE * (page_number & SLOT_MASK) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    #[test]
    fn creates_fixed_size_file() -> Result<()> {
        let dir = tempdir()?;
        let index = PageIndex::for_page_cache(dir.path())?;
        assert_eq!(
            std::fs::metadata(dir.path().join(filenames::INDEX_FILE))?.len(),
            512
        );
        assert_eq!(index.highest_page_number(), 0);
        assert_eq!(index.lowest_tracked_page_number(), 0);
        Ok(())
    }

    #[test]
    fn slots_only_increase() -> Result<()> {
        let dir = tempdir()?;
        let index = PageIndex::for_page_cache(dir.path())?;
        index.on_page_created(130);
        index.on_page_created(2);
        assert!(index.is_page_created(130));
        assert!(!index.is_page_created(2));
        index.on_page_created(258);
        assert!(index.is_page_created(258));
        assert!(!index.is_page_created(130));
        assert_eq!(index.highest_page_number(), 258);
        Ok(())
    }

    #[test]
    fn highest_is_max_regardless_of_order() -> Result<()> {
        let dir = tempdir()?;
        let index = PageIndex::for_page_cache(dir.path())?;
        for page_number in [7_u32, 300, 4, 129, 55, 12] {
            index.on_page_created(page_number);
        }
        assert_eq!(index.highest_page_number(), 300);
        assert!(!index.is_less_than_lowest_tracked_page_number(0));
        Ok(())
    }

    #[test]
    fn lowest_tracked_covers_every_slot() -> Result<()> {
        let dir = tempdir()?;
        let index = PageIndex::for_page_cache(dir.path())?;
        for page_number in 200..(200 + SLOTS as u32) {
            index.on_page_created(page_number);
        }
        assert_eq!(index.lowest_tracked_page_number(), 200);
        assert!(index.is_less_than_lowest_tracked_page_number(199));
        assert!(!index.is_less_than_lowest_tracked_page_number(200));
        assert_eq!(index.highest_page_number(), 327);
        Ok(())
    }

    #[test]
    fn refresh_replays_existing_pages_and_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        for page_number in [0_u32, 1, 2, 129] {
            std::fs::write(filenames::for_page_number(page_number, dir.path()), b"")?;
        }
        {
            let index = PageIndex::for_page_cache(dir.path())?;
            assert!(index.is_page_created(2));
            assert!(index.is_page_created(129));
            assert!(!index.is_page_created(1));
        }
        let reopened = PageIndex::for_page_cache(dir.path())?;
        assert_eq!(reopened.highest_page_number(), 129);
        Ok(())
    }

    #[test]
    fn open_existing_neither_creates_nor_replays() -> Result<()> {
        let dir = tempdir()?;
        assert!(PageIndex::open_existing(dir.path())?.is_none());
        assert!(!dir.path().join(filenames::INDEX_FILE).exists());

        drop(PageIndex::for_page_cache(dir.path())?);
        std::fs::write(filenames::for_page_number(5, dir.path()), b"")?;
        let index = PageIndex::open_existing(dir.path())?.expect("index exists");
        assert!(!index.is_page_created(5));
        assert_eq!(index.highest_page_number(), 0);
        Ok(())
    }

    #[test]
    fn concurrent_updates_keep_the_maximum() -> Result<()> {
        const THREADS: u32 = 4;
        let dir = tempdir()?;
        let index = Arc::new(PageIndex::for_page_cache(dir.path())?);
        let barrier = Arc::new(Barrier::new(THREADS as usize));
        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for round in 0..64_u32 {
                        index.on_page_created(round * SLOTS as u32 * THREADS + thread * SLOTS as u32);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("index thread");
        }
        let expected = 63 * SLOTS as u32 * THREADS + (THREADS - 1) * SLOTS as u32;
        assert_eq!(index.highest_page_number(), expected as i32);
        assert!(index.is_page_created(expected));
        Ok(())
    }
}
