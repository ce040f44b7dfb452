//! Buffer and reader configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::header::{HEADER_SIZE, MAX_PAGE_SIZE, RECORD_ALIGN};
use crate::wait::WaitStrategy;
use crate::{Error, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 64 * 1024;
pub const DEFAULT_CACHE_SIZE: usize = 32;
const MIN_PAGE_SIZE: u32 = 64;

/// Configuration for a [`PageCache`](crate::PageCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Bytes per page file. Must hold the largest record plus its 4-byte header.
    /// Default: 64 KiB
    pub page_size: u32,

    /// Number of pages the reader-side cache keeps mapped. Must be a power of two.
    /// Default: 32
    pub cache_size: usize,

    /// Touch every OS page of a freshly allocated page file before publishing it.
    /// Default: false
    pub prefault: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            prefault: false,
        }
    }
}

impl BufferConfig {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    /// Largest payload a single record can carry.
    pub fn max_record_length(&self) -> usize {
        self.page_size as usize - HEADER_SIZE
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "page_size {} is below the minimum of {MIN_PAGE_SIZE}",
                self.page_size
            )));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "page_size {} exceeds the maximum of {MAX_PAGE_SIZE}",
                self.page_size
            )));
        }
        if self.page_size as usize % RECORD_ALIGN != 0 {
            return Err(Error::InvalidConfig(format!(
                "page_size {} is not a multiple of {RECORD_ALIGN}",
                self.page_size
            )));
        }
        if !self.cache_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "cache_size {} must be a power of two",
                self.cache_size
            )));
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for a [`StreamingReader`](crate::StreamingReader).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Keep polling at the tail instead of returning once the log is drained.
    pub tail: bool,

    /// Hand records to the handler as views into the mapped page.
    pub zero_copy: bool,

    /// How a tailing reader idles between empty polls.
    pub wait: WaitStrategy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            tail: false,
            zero_copy: false,
            wait: WaitStrategy::default(),
        }
    }
}

impl ReaderConfig {
    pub fn one_shot() -> Self {
        Self::default()
    }

    pub fn tailing() -> Self {
        Self {
            tail: true,
            ..Self::default()
        }
    }

    pub fn zero_copy(self) -> Self {
        Self {
            zero_copy: true,
            ..self
        }
    }
}
