use crate::page::PageRef;

/// Space claimed in the current page for one record, written in place.
///
/// Readers see nothing until [`commit`](Self::commit). A record dropped
/// without committing is published as padding so it never stalls readers.
pub struct WritableRecord {
    page: PageRef,
    position: u32,
    len: usize,
    committed: bool,
}

impl WritableRecord {
    pub(crate) fn new(page: PageRef, position: u32, len: usize) -> Self {
        Self {
            page,
            position,
            len,
            committed: false,
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page.page_number()
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload bytes reserved for this record.
    pub fn buffer(&mut self) -> &mut [u8] {
        // SAFETY: the range was reserved by the write cursor for this record
        // only, and stays mapped while `page` holds its claim.
        unsafe { std::slice::from_raw_parts_mut(self.page.payload_ptr(self.position), self.len) }
    }

    pub fn commit(mut self) {
        self.page.commit(self.position, self.len);
        self.committed = true;
    }
}

impl Drop for WritableRecord {
    fn drop(&mut self) {
        if !self.committed {
            log::warn!(
                "record at page {} position {} dropped uncommitted, publishing as padding",
                self.page.page_number(),
                self.position
            );
            self.page.commit_padding(self.position, self.len);
        }
    }
}
