//! Direct-mapped cache of mapped pages for readers.
//!
//! Slot `n & mask` holds at most one page. Each occupant carries one reference
//! owned by the cache; replacing an occupant is a CAS on the expected old
//! value, and only the winning CAS releases the old occupant's reference.
//! Callers always receive their own claimed reference, so an evicted page stays
//! mapped until the last in-flight user drops its handle.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::allocator::PageAllocator;
use crate::page::{Page, PageRef};
use crate::{Error, Result};

type PageLoader = Box<dyn Fn(u32) -> Result<PageRef> + Send + Sync>;

pub struct LoadedPageCache {
    index_mask: u32,
    cached_pages: Box<[ArcSwapOption<Page>]>,
    page_loader: PageLoader,
}

impl LoadedPageCache {
    pub fn new(allocator: Arc<PageAllocator>, cache_size: usize) -> Result<Self> {
        Self::with_loader(move |page_number| allocator.map_existing(page_number), cache_size)
    }

    pub fn with_loader<F>(loader: F, cache_size: usize) -> Result<Self>
    where
        F: Fn(u32) -> Result<PageRef> + Send + Sync + 'static,
    {
        if !cache_size.is_power_of_two() || cache_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "cache_size {cache_size} must be a power of two"
            )));
        }
        let cached_pages = (0..cache_size)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            index_mask: cache_size as u32 - 1,
            cached_pages,
            page_loader: Box::new(loader),
        })
    }

    pub fn cache_size(&self) -> usize {
        self.cached_pages.len()
    }

    /// Returns a claimed handle to `page_number`, loading it on a miss.
    pub fn acquire(&self, page_number: u32) -> Result<PageRef> {
        let slot = &self.cached_pages[self.to_cached_page_index(page_number)];
        loop {
            let cached = slot.load_full();
            if let Some(page) = cached.as_ref() {
                if page.page_number() == page_number {
                    match PageRef::try_claim(page) {
                        Some(handle) => return Ok(handle),
                        // Retired between load and claim; the slot has moved on.
                        None => continue,
                    }
                }
            }

            let loaded = (self.page_loader)(page_number)?.into_shared();
            let previous = slot.compare_and_swap(&cached, Some(Arc::clone(&loaded)));
            if !same_occupant(&previous, &cached) {
                // Lost the slot; the loaded reference goes to the caller instead.
                return Ok(PageRef::adopt(loaded));
            }
            if let Some(evicted) = cached {
                log::trace!(
                    "evicting page {} for page {}",
                    evicted.page_number(),
                    page_number
                );
                evicted.release_reference();
            }
            if let Some(handle) = PageRef::try_claim(&loaded) {
                return Ok(handle);
            }
        }
    }

    /// Page number currently cached in the slot for `page_number`, if any.
    pub fn cached_page_number(&self, page_number: u32) -> Option<u32> {
        self.cached_pages[self.to_cached_page_index(page_number)]
            .load()
            .as_ref()
            .map(|page| page.page_number())
    }

    fn to_cached_page_index(&self, page_number: u32) -> usize {
        (page_number & self.index_mask) as usize
    }
}

impl Drop for LoadedPageCache {
    fn drop(&mut self) {
        for slot in self.cached_pages.iter() {
            if let Some(page) = slot.swap(None) {
                page.release_reference();
            }
        }
    }
}

fn same_occupant(a: &Option<Arc<Page>>, b: &Option<Arc<Page>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Barrier, Mutex};
    use tempfile::{tempdir, TempDir};

    fn allocator_with_pages(pages: u32) -> (TempDir, Arc<PageAllocator>) {
        let dir = tempdir().expect("tempdir");
        let allocator = Arc::new(PageAllocator::new(dir.path(), 4096, false));
        for page_number in 0..pages {
            allocator
                .safely_allocate_page(page_number)
                .expect("allocate");
        }
        (dir, allocator)
    }

    #[test]
    fn rejects_non_power_of_two() {
        let (_dir, allocator) = allocator_with_pages(0);
        assert!(LoadedPageCache::new(allocator, 12).is_err());
    }

    #[test]
    fn hit_claims_a_reference_for_the_caller() -> Result<()> {
        let (_dir, allocator) = allocator_with_pages(2);
        let cache = LoadedPageCache::new(allocator, 4)?;

        let first = cache.acquire(1)?;
        assert_eq!(first.page_number(), 1);
        assert_eq!(first.reference_count(), 2);

        let second = cache.acquire(1)?;
        assert!(Arc::ptr_eq(first.shared(), second.shared()));
        assert_eq!(first.reference_count(), 3);

        drop(first);
        drop(second);
        assert_eq!(cache.cached_page_number(1), Some(1));
        Ok(())
    }

    #[test]
    fn replacement_releases_the_cache_reference_once() -> Result<()> {
        let (_dir, allocator) = allocator_with_pages(4);
        let cache = LoadedPageCache::new(allocator, 2)?;

        let handle = cache.acquire(1)?;
        let evicted = Arc::clone(handle.shared());
        drop(handle);
        assert_eq!(evicted.reference_count(), 1);

        let replacement = cache.acquire(3)?;
        assert_eq!(replacement.page_number(), 3);
        assert_eq!(cache.cached_page_number(1), Some(3));
        assert!(evicted.is_retired());
        assert!(!evicted.claim_reference());
        Ok(())
    }

    #[test]
    fn in_flight_handle_outlives_eviction() -> Result<()> {
        let (_dir, allocator) = allocator_with_pages(4);
        let cache = LoadedPageCache::new(allocator, 2)?;

        let held = cache.acquire(0)?;
        let _other = cache.acquire(2)?;
        assert_eq!(cache.cached_page_number(0), Some(2));
        assert!(!held.is_retired());
        assert_eq!(held.reference_count(), 1);
        assert!(held.header(0).is_ok());

        let shared = Arc::clone(held.shared());
        drop(held);
        assert!(shared.is_retired());
        Ok(())
    }

    #[test]
    fn missing_page_propagates_not_found() -> Result<()> {
        let (_dir, allocator) = allocator_with_pages(1);
        let cache = LoadedPageCache::new(allocator, 4)?;
        assert!(matches!(cache.acquire(7), Err(Error::PageNotFound(7))));
        assert_eq!(cache.cached_page_number(7), None);
        Ok(())
    }

    #[test]
    fn concurrent_acquire_never_leaks() -> Result<()> {
        const THREADS: usize = 4;
        const ROUNDS: u32 = 2_000;
        let (_dir, allocator) = allocator_with_pages(8);
        let loaded: Arc<Mutex<Vec<Arc<Page>>>> = Arc::new(Mutex::new(Vec::new()));
        let cache = {
            let loaded = Arc::clone(&loaded);
            let allocator = Arc::clone(&allocator);
            Arc::new(LoadedPageCache::with_loader(
                move |page_number| {
                    let page = allocator.map_existing(page_number)?;
                    loaded
                        .lock()
                        .expect("loaded pages")
                        .push(Arc::clone(page.shared()));
                    Ok(page)
                },
                4,
            )?)
        };
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS as u32)
            .map(|thread| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || -> Result<()> {
                    barrier.wait();
                    let mut held = Vec::new();
                    for round in 0..ROUNDS {
                        let page_number = (round * 7 + thread * 3) % 8;
                        let page = cache.acquire(page_number)?;
                        assert_eq!(page.page_number(), page_number);
                        assert!(page.header(0).is_ok());
                        if round % 5 == 0 {
                            held.push(page);
                        }
                        if held.len() > 3 {
                            held.remove(0);
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("acquire thread")?;
        }

        drop(cache);
        let loaded = loaded.lock().expect("loaded pages");
        assert!(!loaded.is_empty());
        for page in loaded.iter() {
            assert!(page.is_retired(), "leaked reference on {page:?}");
        }
        Ok(())
    }
}
