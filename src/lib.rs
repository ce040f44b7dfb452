//! File-backed paged append log.
//!
//! Records are appended to fixed-size memory-mapped page files in a
//! directory. Any number of threads may append concurrently through a shared
//! [`PageCache`]; [`StreamingReader`]s replay the log in order, optionally
//! following the tail as new records are committed. A [`PageReader`] opens
//! an existing log for reading without modifying it.

pub mod allocator;
pub mod config;
pub mod error;
pub mod filenames;
pub mod header;
pub mod loaded_page_cache;
pub mod mmap;
pub mod page;
pub mod page_cache;
pub mod page_index;
pub mod page_reader;
pub mod reader;
pub mod record;
pub mod slab;
pub mod topic;
pub mod wait;

pub use allocator::PageAllocator;
pub use config::{BufferConfig, ReaderConfig};
pub use error::{Error, Result};
pub use loaded_page_cache::LoadedPageCache;
pub use page::{Page, PageRef, PageView, WriteResult};
pub use page_cache::PageCache;
pub use page_index::PageIndex;
pub use page_reader::PageReader;
pub use reader::{PageSource, RecordHandler, StreamingReader};
pub use record::WritableRecord;
pub use slab::Slab;
pub use topic::{Publisher, Subscriber, TopicDispatcher, TopicHeader, TopicRegistry};
pub use wait::WaitStrategy;
