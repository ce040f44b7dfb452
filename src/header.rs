//! Record header word.
//!
//! Every record starts with one `u32` at an 8-byte aligned page offset:
//!
//! ```text
//!  31      30        29        28 ............... 0
//! +-------+---------+---------+---------------------+
//! | READY | PADDING | CLAIMED |   payload length    |
//! +-------+---------+---------+---------------------+
//! ```
//!
//! A zero word means nothing has been written there yet. The writer stores the
//! length with `CLAIMED` set to take the slot, copies the payload, then stores
//! the word again with `READY` set using release ordering. `CLAIMED` keeps a
//! zero-length claim distinct from unwritten space.

use std::sync::atomic::{AtomicU32, Ordering};

pub const HEADER_SIZE: usize = 4;
pub const RECORD_ALIGN: usize = 8;

pub const NOT_WRITTEN: u32 = 0;
pub const READY_BIT: u32 = 1 << 31;
pub const PADDING_BIT: u32 = 1 << 30;
pub const CLAIMED_BIT: u32 = 1 << 29;
pub const LENGTH_MASK: u32 = CLAIMED_BIT - 1;

/// Largest page (and therefore largest record) the header can describe.
pub const MAX_PAGE_SIZE: u32 = 1 << 29;

pub fn is_ready(header: u32) -> bool {
    header & READY_BIT != 0
}

pub fn is_padding(header: u32) -> bool {
    header & PADDING_BIT != 0
}

/// A slot taken by a writer that has not committed it yet.
pub fn is_claimed(header: u32) -> bool {
    header & (READY_BIT | CLAIMED_BIT) == CLAIMED_BIT
}

pub fn record_length(header: u32) -> usize {
    (header & LENGTH_MASK) as usize
}

fn length_bits(len: usize) -> u32 {
    debug_assert!(len <= LENGTH_MASK as usize);
    len as u32 & LENGTH_MASK
}

pub fn claimed(len: usize) -> u32 {
    length_bits(len) | CLAIMED_BIT
}

pub fn ready(len: usize) -> u32 {
    length_bits(len) | READY_BIT
}

pub fn padding(len: usize) -> u32 {
    length_bits(len) | READY_BIT | PADDING_BIT
}

/// Bytes a record with `len` payload bytes consumes, including alignment slack.
pub fn framed_length(len: usize) -> usize {
    align_up(HEADER_SIZE + len, RECORD_ALIGN)
}

pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

pub fn load(ptr: *const u8) -> u32 {
    // SAFETY: callers pass a RECORD_ALIGN aligned address inside a live mapping.
    let atomic = unsafe { &*(ptr as *const AtomicU32) };
    u32::from_le(atomic.load(Ordering::Acquire))
}

pub fn store(ptr: *mut u8, header: u32) {
    // SAFETY: callers pass a RECORD_ALIGN aligned address inside a live mapping.
    let atomic = unsafe { &*(ptr as *const AtomicU32) };
    atomic.store(header.to_le(), Ordering::Release);
}
