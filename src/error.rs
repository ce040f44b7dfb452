use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("page {0} not found")]
    PageNotFound(u32),
    #[error("message of {len} bytes too large for page {page_number} (capacity {capacity})")]
    MessageTooLarge {
        page_number: u32,
        len: usize,
        capacity: u32,
    },
    #[error("failed to append to page {page_number}")]
    WriteFailed { page_number: u32 },
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("topic {name} conflicts with existing topic id {topic_id}")]
    TopicConflict { name: String, topic_id: u32 },
}

impl Error {
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            Error::PageNotFound(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
