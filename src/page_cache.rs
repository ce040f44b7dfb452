//! The log: the appendable current page plus page lookup for readers.
//!
//! # Rollover
//!
//! `current_page_number` is claimed before `current_page` is installed. An
//! appender whose write overflows page `p` either wins the CAS `p -> p + 1`
//! and installs the new page, or sees `p + 1` already claimed and spins until
//! the winner's page becomes current. Either way it then retries its write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_utils::Backoff;

use crate::allocator::PageAllocator;
use crate::config::BufferConfig;
use crate::filenames;
use crate::loaded_page_cache::LoadedPageCache;
use crate::page::{Page, PageRef, WriteResult};
use crate::page_index::PageIndex;
use crate::record::WritableRecord;
use crate::{Error, Result};

const INITIAL_PAGE_NUMBER: u32 = 0;

pub struct PageCache {
    path: PathBuf,
    config: BufferConfig,
    allocator: Arc<PageAllocator>,
    index: PageIndex,
    loaded_pages: LoadedPageCache,
    current_page: ArcSwap<Page>,
    current_page_number: AtomicU32,
}

impl PageCache {
    pub fn create(path: impl AsRef<Path>, page_size: u32) -> Result<Arc<Self>> {
        Self::open(path, BufferConfig::with_page_size(page_size))
    }

    /// Opens the buffer in `path`, resuming after the last record of the
    /// highest existing page or starting a fresh log at page 0.
    pub fn open(path: impl AsRef<Path>, config: BufferConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        filenames::ensure_directory_exists(&path)?;

        let allocator = Arc::new(PageAllocator::new(&path, config.page_size, config.prefault));
        let index = PageIndex::for_page_cache(&path)?;

        let existing = filenames::discover_pages(&path)?;
        let mut current = match existing.last() {
            Some(&page_number) => allocator.load_existing(page_number)?,
            None => allocator.safely_allocate_page(INITIAL_PAGE_NUMBER)?,
        };
        if current.is_sealed() {
            let next = next_page_number(current.page_number())?;
            current = allocator.safely_allocate_page(next)?;
        }
        index.on_page_created(current.page_number());
        log::info!(
            "opened page cache at {} on page {} position {} ({} existing pages, page size {})",
            path.display(),
            current.page_number(),
            current.next_available_position(),
            existing.len(),
            config.page_size
        );

        let loaded_pages = LoadedPageCache::new(Arc::clone(&allocator), config.cache_size)?;
        let current_page_number = current.page_number();
        Ok(Arc::new(Self {
            path,
            config,
            allocator,
            index,
            loaded_pages,
            current_page: ArcSwap::new(current.into_shared()),
            current_page_number: AtomicU32::new(current_page_number),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    pub fn index(&self) -> &PageIndex {
        &self.index
    }

    pub fn allocator(&self) -> &PageAllocator {
        &self.allocator
    }

    pub fn current_page_number(&self) -> u32 {
        self.current_page_number.load(Ordering::Acquire)
    }

    /// A claimed handle to the page currently accepting appends.
    pub fn current_page(&self) -> PageRef {
        self.claim_current_page()
    }

    /// Appends one record, rolling to a new page when the current one is full.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        loop {
            let page = self.claim_current_page();
            match page.write(payload) {
                WriteResult::Success => return Ok(()),
                WriteResult::NotEnoughSpace => self.handle_overflow(page.page_number())?,
                result => return Err(write_error(&page, payload.len(), result)),
            }
        }
    }

    /// Reserves `len` bytes for a record to be written in place.
    pub fn claim(&self, len: usize) -> Result<WritableRecord> {
        loop {
            let page = self.claim_current_page();
            match page.claim(len) {
                Ok(position) => return Ok(WritableRecord::new(page, position, len)),
                Err(WriteResult::NotEnoughSpace) => self.handle_overflow(page.page_number())?,
                Err(result) => return Err(write_error(&page, len, result)),
            }
        }
    }

    /// Bytes written so far, assuming every earlier page was filled.
    pub fn estimate_total_length(&self) -> u64 {
        let page = self.current_page.load();
        u64::from(page.page_number()) * u64::from(page.total_data_size())
            + u64::from(page.next_available_position())
    }

    pub fn is_page_available(&self, page_number: u32) -> bool {
        self.index.is_page_created(page_number)
            || filenames::for_page_number(page_number, &self.path).exists()
    }

    /// A claimed handle to an existing page, served through the loaded-page cache.
    pub fn get_page(&self, page_number: u32) -> Result<PageRef> {
        self.loaded_pages.acquire(page_number)
    }

    pub fn flush(&self) -> Result<()> {
        self.claim_current_page().flush()
    }

    fn claim_current_page(&self) -> PageRef {
        let backoff = Backoff::new();
        loop {
            let page = self.current_page.load();
            if let Some(handle) = PageRef::try_claim(&page) {
                return handle;
            }
            // Retired after being swapped out; the next load sees its successor.
            backoff.snooze();
        }
    }

    fn handle_overflow(&self, page_number: u32) -> Result<()> {
        let next = next_page_number(page_number)?;
        let backoff = Backoff::new();
        loop {
            let claimed = self.current_page_number.load(Ordering::Acquire);
            if claimed >= next {
                // Another appender won the roll and is installing the page.
                while self.current_page.load().page_number() < next {
                    if self.current_page_number.load(Ordering::Acquire) < next {
                        break;
                    }
                    backoff.snooze();
                }
                return Ok(());
            }
            if self
                .current_page_number
                .compare_exchange(page_number, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return self.install_page(page_number, next);
            }
        }
    }

    fn install_page(&self, previous: u32, next: u32) -> Result<()> {
        let page = match self.allocator.safely_allocate_page(next) {
            Ok(page) => page,
            Err(err) => {
                self.current_page_number.store(previous, Ordering::Release);
                return Err(err);
            }
        };
        self.index.on_page_created(next);
        let replaced = self.current_page.swap(page.into_shared());
        if let Err(err) = replaced.flush_async() {
            log::warn!("failed to flush page {}: {}", previous, err);
        }
        replaced.release_reference();
        log::debug!("rolled page {} -> {} in {}", previous, next, self.path.display());
        Ok(())
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        self.current_page.load().release_reference();
    }
}

fn next_page_number(page_number: u32) -> Result<u32> {
    page_number
        .checked_add(1)
        .ok_or(Error::Unsupported("page number space exhausted"))
}

fn write_error(page: &Page, len: usize, result: WriteResult) -> Error {
    match result {
        WriteResult::MessageTooLarge => Error::MessageTooLarge {
            page_number: page.page_number(),
            len,
            capacity: page.total_data_size(),
        },
        _ => Error::WriteFailed {
            page_number: page.page_number(),
        },
    }
}
