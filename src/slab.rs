use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::mmap::MmapFile;
use crate::Result;

/// Fixed-size mapped region addressed as 4-byte atomic integers.
pub struct Slab {
    mmap: MmapFile,
}

impl Slab {
    pub fn new(mmap: MmapFile) -> Self {
        Self { mmap }
    }

    pub fn map(path: &Path) -> Result<Self> {
        Ok(Self::new(MmapFile::open(path)?))
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn get_int_volatile(&self, offset: usize) -> i32 {
        self.int_at(offset).load(Ordering::Acquire)
    }

    pub fn put_int_ordered(&self, offset: usize, value: i32) {
        self.int_at(offset).store(value, Ordering::Release);
    }

    pub fn compare_and_set_int(&self, offset: usize, expected: i32, value: i32) -> bool {
        self.int_at(offset)
            .compare_exchange(expected, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn int_at(&self, offset: usize) -> &AtomicI32 {
        debug_assert!(offset % 4 == 0, "slab offset {offset} is not 4-byte aligned");
        debug_assert!(offset + 4 <= self.mmap.len(), "slab offset {offset} out of bounds");
        // SAFETY: the mapping is page aligned, the offset is 4-byte aligned and in
        // bounds, and the mapping lives as long as `self`.
        unsafe { &*(self.mmap.as_mut_ptr().add(offset) as *const AtomicI32) }
    }
}
