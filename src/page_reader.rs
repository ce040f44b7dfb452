//! Read-only access to a log written by another [`PageCache`](crate::PageCache).
//!
//! Opening a `PageReader` never creates the directory, the index or a page,
//! and pages are mapped without cursor recovery, so a reader attached to a
//! live writer cannot disturb records that are still being filled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::allocator::PageAllocator;
use crate::config::BufferConfig;
use crate::filenames;
use crate::loaded_page_cache::LoadedPageCache;
use crate::page::PageRef;
use crate::page_index::PageIndex;
use crate::reader::PageSource;
use crate::Result;

pub struct PageReader {
    path: PathBuf,
    config: BufferConfig,
    index: Option<PageIndex>,
    loaded_pages: LoadedPageCache,
}

impl PageReader {
    pub fn open(path: impl AsRef<Path>, config: BufferConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let index = PageIndex::open_existing(&path)?;
        if index.is_none() {
            log::debug!("no page index in {}, checking page files directly", path.display());
        }
        let allocator = Arc::new(PageAllocator::new(&path, config.page_size, config.prefault));
        let loaded_pages = LoadedPageCache::new(allocator, config.cache_size)?;
        Ok(Arc::new(Self {
            path,
            config,
            index,
            loaded_pages,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    pub fn index(&self) -> Option<&PageIndex> {
        self.index.as_ref()
    }

    /// Page numbers present on disk, ascending.
    pub fn pages(&self) -> Result<Vec<u32>> {
        filenames::discover_pages(&self.path)
    }

    pub fn is_page_available(&self, page_number: u32) -> bool {
        self.index
            .as_ref()
            .is_some_and(|index| index.is_page_created(page_number))
            || filenames::for_page_number(page_number, &self.path).exists()
    }

    pub fn get_page(&self, page_number: u32) -> Result<PageRef> {
        self.loaded_pages.acquire(page_number)
    }

    /// Bytes committed so far, assuming every page before the last was filled.
    pub fn estimate_total_length(&self) -> Result<u64> {
        let Some(&last) = self.pages()?.last() else {
            return Ok(0);
        };
        let page = self.get_page(last)?;
        Ok(u64::from(last) * u64::from(page.total_data_size()) + u64::from(page.written_length()))
    }
}

impl PageSource for PageReader {
    fn is_page_available(&self, page_number: u32) -> bool {
        PageReader::is_page_available(self, page_number)
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef> {
        PageReader::get_page(self, page_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::framed_length;
    use crate::page_cache::PageCache;
    use tempfile::tempdir;

    #[test]
    fn missing_buffer_stays_missing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("absent");
        let reader = PageReader::open(&path, BufferConfig::with_page_size(4096))?;
        assert!(reader.index().is_none());
        assert!(!reader.is_page_available(0));
        assert_eq!(reader.estimate_total_length()?, 0);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn sealed_last_page_is_not_rolled() -> Result<()> {
        let dir = tempdir()?;
        {
            let cache = PageCache::create(dir.path(), 128)?;
            cache.append(&[1u8; 124])?;
        }
        assert_eq!(filenames::discover_pages(dir.path())?, vec![0]);

        let reader = PageReader::open(dir.path(), BufferConfig::with_page_size(128))?;
        let page = reader.get_page(0)?;
        assert_eq!(page.next_available_position(), 0);
        assert_eq!(page.written_length(), page.total_data_size());
        assert!(!reader.is_page_available(1));
        assert_eq!(reader.pages()?, vec![0]);
        assert_eq!(filenames::discover_pages(dir.path())?, vec![0]);
        Ok(())
    }

    #[test]
    fn estimate_counts_committed_bytes_only() -> Result<()> {
        let dir = tempdir()?;
        let cache = PageCache::create(dir.path(), 4096)?;
        cache.append(b"abc")?;
        let pending = cache.claim(20)?;
        let reader = PageReader::open(dir.path(), BufferConfig::with_page_size(4096))?;
        assert_eq!(reader.estimate_total_length()?, framed_length(3) as u64);
        pending.commit();
        assert_eq!(
            reader.estimate_total_length()?,
            (framed_length(3) + framed_length(20)) as u64
        );
        Ok(())
    }
}
