//! Sequential reader over the pages of a log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ReaderConfig;
use crate::header::{framed_length, RECORD_ALIGN};
use crate::page::{Page, PageRef};
use crate::page_cache::PageCache;
use crate::wait::Idler;
use crate::{Error, Result};

/// Receives every committed record in log order.
///
/// `record` is only valid for the duration of the call. In zero-copy mode it
/// points into the mapped page; otherwise into the reader's scratch buffer.
pub trait RecordHandler {
    fn on_record(&mut self, record: &[u8], page_number: u32, position: u32);
}

impl<F> RecordHandler for F
where
    F: FnMut(&[u8], u32, u32),
{
    fn on_record(&mut self, record: &[u8], page_number: u32, position: u32) {
        self(record, page_number, position)
    }
}

/// Where a reader finds pages.
///
/// Implemented by the appending [`PageCache`] and by the read-only
/// [`PageReader`](crate::PageReader), which never creates or repairs files.
pub trait PageSource {
    fn is_page_available(&self, page_number: u32) -> bool;

    /// A claimed handle to an existing page. A page the source reports as
    /// available but cannot map is an error, not a stall.
    fn get_page(&self, page_number: u32) -> Result<PageRef>;
}

impl PageSource for PageCache {
    fn is_page_available(&self, page_number: u32) -> bool {
        PageCache::is_page_available(self, page_number)
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef> {
        PageCache::get_page(self, page_number)
    }
}

pub struct StreamingReader<H, S: ?Sized = PageCache> {
    pages: Arc<S>,
    record_handler: H,
    config: ReaderConfig,
    page_number: u32,
    position: u32,
    page: Option<PageRef>,
    buffer: Vec<u8>,
    idler: Idler,
    stop: Option<Arc<AtomicBool>>,
}

impl<H, S> StreamingReader<H, S>
where
    H: RecordHandler,
    S: PageSource + ?Sized,
{
    pub fn new(pages: Arc<S>, record_handler: H, config: ReaderConfig) -> Self {
        Self {
            pages,
            record_handler,
            config,
            page_number: 0,
            position: 0,
            page: None,
            buffer: Vec::new(),
            idler: Idler::new(config.wait),
            stop: None,
        }
    }

    /// Resumes at a record boundary previously reported to the handler.
    pub fn starting_at(mut self, page_number: u32, position: u32) -> Result<Self> {
        if position as usize % RECORD_ALIGN != 0 {
            return Err(Error::Unsupported("start position is not record aligned"));
        }
        self.close_page();
        self.page_number = page_number;
        self.position = position;
        Ok(self)
    }

    /// A tailing reader returns from [`process`](Self::process) once `stop` is set.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn handler(&self) -> &H {
        &self.record_handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.record_handler
    }

    pub fn into_handler(self) -> H {
        self.record_handler
    }

    /// Reads until the log is drained, or until stopped when tailing.
    pub fn process(&mut self) -> Result<()> {
        loop {
            if self.is_stopped() {
                return Ok(());
            }
            if self.process_record()? {
                self.idler.reset();
                continue;
            }
            if !self.config.tail {
                return Ok(());
            }
            self.idler.idle();
        }
    }

    /// Makes one step of progress. Returns `false` when nothing new is committed.
    ///
    /// A step delivers a record, skips padding, or moves past a sealed page.
    pub fn process_record(&mut self) -> Result<bool> {
        if self.page.is_none() {
            if !self.pages.is_page_available(self.page_number) {
                return Ok(false);
            }
            self.page = Some(self.pages.get_page(self.page_number)?);
        }
        let Some(page) = self.page.as_ref() else {
            return Ok(false);
        };

        if self.position >= page.total_data_size() {
            log::trace!("reader finished page {}", self.page_number);
            self.close_page();
            self.page_number = self
                .page_number
                .checked_add(1)
                .ok_or(Error::Unsupported("page number space exhausted"))?;
            self.position = 0;
            return Ok(true);
        }

        let header = page.header(self.position)?;
        if !Page::is_ready(header) {
            return Ok(false);
        }
        let length = Page::record_length(header);
        if !Page::is_padding(header) {
            if self.config.zero_copy {
                let mut view = page.slice();
                page.set_slice(&mut view, self.position, length)?;
                self.record_handler
                    .on_record(view.as_bytes(), self.page_number, self.position);
            } else {
                if self.buffer.len() < length {
                    self.buffer.resize(length.next_power_of_two(), 0);
                }
                let scratch = &mut self.buffer[..length];
                page.read(self.position, scratch)?;
                self.record_handler
                    .on_record(scratch, self.page_number, self.position);
            }
        }
        self.position += framed_length(length) as u32;
        Ok(true)
    }

    fn is_stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::Acquire))
    }

    fn close_page(&mut self) {
        self.page = None;
    }
}
