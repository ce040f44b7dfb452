//! One fixed-capacity, memory-mapped segment of the log.
//!
//! # Layout
//!
//! ```text
//! +--------+---------+~~~~~+--------+---------+~~~~~+-----------------+
//! | header | payload | pad | header | payload | pad |   zero bytes    |
//! +--------+---------+~~~~~+--------+---------+~~~~~+-----------------+
//! ^ 0                      ^ aligned                ^ next_available  ^ capacity
//! ```
//!
//! The write cursor is advanced with a CAS before any byte is touched, so
//! concurrent appenders never overlap. The thread that finds the page too
//! full for its record moves the cursor to the capacity and writes a ready
//! padding record over the remainder, which tells readers the page is sealed.
//!
//! # Lifetime
//!
//! A page starts with one reference, owned by whoever created it. Holders
//! claim and release references; the mapping is dropped when the count
//! reaches zero and a retired page can never be claimed again. Mapped bytes
//! are only reachable through a [`PageRef`], which always owns a claim.

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::header::{self, HEADER_SIZE, MAX_PAGE_SIZE, NOT_WRITTEN, RECORD_ALIGN};
use crate::mmap::MmapFile;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteResult {
    Success,
    Failure,
    MessageTooLarge,
    NotEnoughSpace,
}

pub struct Page {
    page_number: u32,
    base: NonNull<u8>,
    capacity: u32,
    next_available: AtomicU32,
    ref_count: AtomicU32,
    mapping: Mutex<Option<MmapFile>>,
}

// SAFETY: `base` points into `mapping`, which is only dropped once the
// reference count reaches zero; all shared mutation goes through atomics or
// through byte ranges exclusively reserved by the write cursor.
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    /// Maps a page for appending. The write cursor is recovered and any slot
    /// left claimed by an earlier writer is committed as padding.
    pub(crate) fn from_mapping(page_number: u32, mmap: MmapFile) -> Result<PageRef> {
        let page = Self::mapped(page_number, mmap)?;
        page.recover_write_position();
        Ok(PageRef::adopt(Arc::new(page)))
    }

    /// Maps a page for reading only. The write cursor is left at zero.
    pub(crate) fn for_reading(page_number: u32, mmap: MmapFile) -> Result<PageRef> {
        Ok(PageRef::adopt(Arc::new(Self::mapped(page_number, mmap)?)))
    }

    fn mapped(page_number: u32, mmap: MmapFile) -> Result<Page> {
        let len = mmap.len();
        if len > MAX_PAGE_SIZE as usize {
            return Err(Error::Unsupported("page larger than header length field"));
        }
        if len % RECORD_ALIGN != 0 {
            return Err(Error::Corrupt("page size not record aligned"));
        }
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(Error::Corrupt("null page mapping"))?;
        Ok(Page {
            page_number,
            base,
            capacity: len as u32,
            next_available: AtomicU32::new(0),
            ref_count: AtomicU32::new(1),
            mapping: Mutex::new(Some(mmap)),
        })
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn total_data_size(&self) -> u32 {
        self.capacity
    }

    pub fn next_available_position(&self) -> u32 {
        self.next_available.load(Ordering::Acquire)
    }

    /// True once the write cursor has reached the capacity.
    pub fn is_sealed(&self) -> bool {
        self.next_available_position() >= self.capacity
    }

    /// Appends `payload` as one record.
    pub fn write(&self, payload: &[u8]) -> WriteResult {
        let position = match self.reserve(payload.len()) {
            Ok(position) => position,
            Err(result) => return result,
        };
        let ptr = self.ptr_at(position);
        header::store(ptr, header::claimed(payload.len()));
        // SAFETY: [position + HEADER_SIZE, + len) was reserved by this call.
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                ptr.add(HEADER_SIZE),
                payload.len(),
            );
        }
        header::store(ptr, header::ready(payload.len()));
        WriteResult::Success
    }

    /// Reserves space for a `len` byte record and marks its header as claimed.
    pub(crate) fn claim(&self, len: usize) -> std::result::Result<u32, WriteResult> {
        let position = self.reserve(len)?;
        header::store(self.ptr_at(position), header::claimed(len));
        Ok(position)
    }

    pub(crate) fn commit(&self, position: u32, len: usize) {
        header::store(self.ptr_at(position), header::ready(len));
    }

    pub(crate) fn commit_padding(&self, position: u32, len: usize) {
        header::store(self.ptr_at(position), header::padding(len));
    }

    /// Raw pointer to the payload of the record at `position`.
    pub(crate) fn payload_ptr(&self, position: u32) -> *mut u8 {
        // SAFETY: claimed positions always leave room for the header.
        unsafe { self.ptr_at(position).add(HEADER_SIZE) }
    }

    fn reserve(&self, len: usize) -> std::result::Result<u32, WriteResult> {
        let capacity = self.capacity as usize;
        if HEADER_SIZE + len > capacity {
            return Err(WriteResult::MessageTooLarge);
        }
        let framed = header::framed_length(len);
        let mut current = self.next_available.load(Ordering::Acquire);
        loop {
            let position = current as usize;
            if position + HEADER_SIZE + len > capacity {
                if position >= capacity {
                    return Err(WriteResult::NotEnoughSpace);
                }
                match self.next_available.compare_exchange(
                    current,
                    self.capacity,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.seal_at(current);
                        return Err(WriteResult::NotEnoughSpace);
                    }
                    Err(actual) => {
                        current = actual;
                        continue;
                    }
                }
            }
            let next = (position + framed) as u32;
            match self.next_available.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if header::load(self.ptr_at(current)) != NOT_WRITTEN {
                        return Err(WriteResult::Failure);
                    }
                    return Ok(current);
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn seal_at(&self, position: u32) {
        let remaining = (self.capacity - position) as usize;
        self.commit_padding(position, remaining - HEADER_SIZE);
    }

    fn recover_write_position(&self) {
        let position = self.scan_records(true);
        self.next_available.store(position, Ordering::Release);
    }

    /// Offset just past the last committed record, found by walking headers
    /// from the start of the page. Does not touch the write cursor.
    pub fn written_length(&self) -> u32 {
        self.scan_records(false)
    }

    /// Walks the records from offset 0 and returns where the first unwritten
    /// slot begins. With `repair` set, claims that were never committed are
    /// published as padding and walked over; otherwise they end the walk.
    fn scan_records(&self, repair: bool) -> u32 {
        let capacity = self.capacity as usize;
        let mut position = 0_usize;
        while position + HEADER_SIZE <= capacity {
            let word = header::load(self.ptr_at(position as u32));
            if word == NOT_WRITTEN {
                break;
            }
            let len = header::record_length(word);
            let next = position + header::framed_length(len);
            if next > capacity {
                break;
            }
            if !header::is_ready(word) {
                if !repair || !header::is_claimed(word) {
                    break;
                }
                log::warn!(
                    "page {} position {} was claimed but never committed, publishing as padding",
                    self.page_number,
                    position
                );
                self.commit_padding(position as u32, len);
            }
            position = next;
        }
        position as u32
    }

    /// Loads the header word at `position` with acquire ordering.
    pub fn header(&self, position: u32) -> Result<u32> {
        let at = position as usize;
        if at % RECORD_ALIGN != 0 {
            return Err(Error::Corrupt("record position not aligned"));
        }
        if at + HEADER_SIZE > self.capacity as usize {
            return Err(Error::Corrupt("record position out of bounds"));
        }
        Ok(header::load(self.ptr_at(position)))
    }

    pub fn is_ready(header: u32) -> bool {
        header::is_ready(header)
    }

    pub fn is_padding(header: u32) -> bool {
        header::is_padding(header)
    }

    pub fn record_length(header: u32) -> usize {
        header::record_length(header)
    }

    /// View over the whole mapped page.
    pub fn slice(&self) -> PageView<'_> {
        PageView {
            base: self.base,
            offset: 0,
            len: self.capacity as usize,
            _page: PhantomData,
        }
    }

    /// Narrows `view` to the payload of the record at `position`.
    pub fn set_slice(&self, view: &mut PageView<'_>, position: u32, len: usize) -> Result<()> {
        let start = self.payload_start(position, len)?;
        view.offset = start;
        view.len = len;
        Ok(())
    }

    /// Copies the payload of the record at `position` into `dest`, which must be
    /// exactly the record length.
    pub fn read(&self, position: u32, dest: &mut [u8]) -> Result<()> {
        let start = self.payload_start(position, dest.len())?;
        // SAFETY: bounds checked above; ready records are immutable.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(start),
                dest.as_mut_ptr(),
                dest.len(),
            );
        }
        Ok(())
    }

    fn payload_start(&self, position: u32, len: usize) -> Result<usize> {
        let start = position as usize + HEADER_SIZE;
        let end = start
            .checked_add(len)
            .ok_or(Error::Corrupt("record length overflow"))?;
        if end > self.capacity as usize {
            return Err(Error::Corrupt("record extends past page"));
        }
        Ok(start)
    }

    fn ptr_at(&self, position: u32) -> *mut u8 {
        debug_assert!((position as usize) < self.capacity as usize);
        // SAFETY: positions handed out by the cursor are below the capacity.
        unsafe { self.base.as_ptr().add(position as usize) }
    }

    /// Writes the page back to its file and waits for it to reach disk.
    pub fn flush(&self) -> Result<()> {
        let mapping = self.mapping.lock().unwrap_or_else(PoisonError::into_inner);
        match mapping.as_ref() {
            Some(mmap) => {
                mmap.flush_sync()?;
                mmap.sync()
            }
            None => Err(Error::Unsupported("page already unmapped")),
        }
    }

    /// Starts writing the page back without waiting.
    pub fn flush_async(&self) -> Result<()> {
        let mapping = self.mapping.lock().unwrap_or_else(PoisonError::into_inner);
        match mapping.as_ref() {
            Some(mmap) => mmap.flush_async(),
            None => Err(Error::Unsupported("page already unmapped")),
        }
    }

    /// Adds a reference unless the page has already been retired.
    pub fn claim_reference(&self) -> bool {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == 0 {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    /// Drops a reference, unmapping the page when it was the last one.
    pub fn release_reference(&self) {
        match self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
        {
            Ok(1) => self.retire(),
            Ok(_) => {}
            Err(_) => log::warn!("reference released on retired page {}", self.page_number),
        }
    }

    pub fn reference_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_retired(&self) -> bool {
        self.reference_count() == 0
    }

    fn retire(&self) {
        let mapping = self
            .mapping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(mapping);
        log::trace!("page {} unmapped", self.page_number);
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_number", &self.page_number)
            .field("capacity", &self.capacity)
            .field("next_available", &self.next_available_position())
            .field("ref_count", &self.reference_count())
            .finish()
    }
}

/// A claimed reference to a [`Page`]; released on drop.
pub struct PageRef {
    page: Arc<Page>,
}

impl PageRef {
    /// Wraps a page whose reference has already been claimed for the caller.
    pub(crate) fn adopt(page: Arc<Page>) -> Self {
        Self { page }
    }

    pub(crate) fn try_claim(page: &Arc<Page>) -> Option<Self> {
        if page.claim_reference() {
            Some(Self::adopt(Arc::clone(page)))
        } else {
            None
        }
    }

    /// Hands the owned reference over to a holder that releases it manually.
    pub(crate) fn into_shared(self) -> Arc<Page> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the Arc is moved out exactly once.
        unsafe { std::ptr::read(&this.page) }
    }

    pub(crate) fn shared(&self) -> &Arc<Page> {
        &self.page
    }
}

impl Clone for PageRef {
    fn clone(&self) -> Self {
        // A live PageRef keeps the count above zero, so this cannot fail.
        let claimed = self.page.claim_reference();
        debug_assert!(claimed);
        Self::adopt(Arc::clone(&self.page))
    }
}

impl Deref for PageRef {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.page.release_reference();
    }
}

impl std::fmt::Debug for PageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.page.fmt(f)
    }
}

/// Zero-copy window into a mapped page, valid while the page is claimed.
pub struct PageView<'a> {
    base: NonNull<u8>,
    offset: usize,
    len: usize,
    _page: PhantomData<&'a Page>,
}

impl<'a> PageView<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        // SAFETY: the window lies inside the mapping, which outlives 'a.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(self.offset), self.len) }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
