//! Topic-routed messages carried as records.
//!
//! Each record starts with a [`TopicHeader`]: the little-endian topic id
//! followed by a one-byte method id. The rest of the record is the
//! method's argument bytes, left to the application to encode.

use std::collections::HashMap;
use std::sync::Arc;

use crate::page_cache::PageCache;
use crate::reader::RecordHandler;
use crate::record::WritableRecord;
use crate::{Error, Result};

pub const TOPIC_HEADER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicHeader {
    pub topic_id: u32,
    pub method_id: u8,
}

impl TopicHeader {
    pub fn new(topic_id: u32, method_id: u8) -> Self {
        Self {
            topic_id,
            method_id,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < TOPIC_HEADER_SIZE {
            return Err(Error::Corrupt("buffer too short for topic header"));
        }
        buf[0..4].copy_from_slice(&self.topic_id.to_le_bytes());
        buf[4] = self.method_id;
        Ok(())
    }

    /// Splits a record into its header and argument bytes.
    pub fn decode(record: &[u8]) -> Result<(Self, &[u8])> {
        if record.len() < TOPIC_HEADER_SIZE {
            return Err(Error::Corrupt("record shorter than topic header"));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&record[0..4]);
        let header = Self::new(u32::from_le_bytes(id), record[4]);
        Ok((header, &record[TOPIC_HEADER_SIZE..]))
    }
}

/// Stable topic id for `name`: the CRC-32 of its UTF-8 bytes.
pub fn topic_id_for_name(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}

/// Two-way mapping between topic names and ids.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    ids: HashMap<String, u32>,
    names: HashMap<u32, String>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) -> Result<u32> {
        self.register_with_id(name, topic_id_for_name(name))
    }

    /// Registering the same name and id twice is a no-op. Reusing either
    /// half of an existing pair with a different partner is rejected.
    pub fn register_with_id(&mut self, name: &str, topic_id: u32) -> Result<u32> {
        if let Some(&existing) = self.ids.get(name) {
            if existing == topic_id {
                return Ok(topic_id);
            }
            return Err(Error::TopicConflict {
                name: name.to_string(),
                topic_id: existing,
            });
        }
        if self.names.contains_key(&topic_id) {
            return Err(Error::TopicConflict {
                name: name.to_string(),
                topic_id,
            });
        }
        self.ids.insert(name.to_string(), topic_id);
        self.names.insert(topic_id, name.to_string());
        log::debug!("registered topic {name} as {topic_id:#010x}");
        Ok(topic_id)
    }

    pub fn topic_id(&self, name: &str) -> Result<u32> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownTopic(name.to_string()))
    }

    pub fn topic_name(&self, topic_id: u32) -> Option<&str> {
        self.names.get(&topic_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Appends messages for one topic.
#[derive(Clone)]
pub struct Publisher {
    page_cache: Arc<PageCache>,
    topic_id: u32,
}

impl Publisher {
    pub fn new(page_cache: Arc<PageCache>, topic_id: u32) -> Self {
        Self {
            page_cache,
            topic_id,
        }
    }

    pub fn for_topic(page_cache: Arc<PageCache>, registry: &TopicRegistry, name: &str) -> Result<Self> {
        Ok(Self::new(page_cache, registry.topic_id(name)?))
    }

    pub fn topic_id(&self) -> u32 {
        self.topic_id
    }

    /// Claims a record with the header already written. The caller fills
    /// `buffer()[TOPIC_HEADER_SIZE..]` with `args_len` bytes and commits.
    pub fn acquire_record(&self, method_id: u8, args_len: usize) -> Result<WritableRecord> {
        let mut record = self.page_cache.claim(TOPIC_HEADER_SIZE + args_len)?;
        TopicHeader::new(self.topic_id, method_id).encode(record.buffer())?;
        Ok(record)
    }

    pub fn publish(&self, method_id: u8, args: &[u8]) -> Result<()> {
        let mut record = self.acquire_record(method_id, args.len())?;
        record.buffer()[TOPIC_HEADER_SIZE..].copy_from_slice(args);
        record.commit();
        Ok(())
    }
}

/// Receives the messages of one topic.
pub trait Subscriber {
    fn on_message(&mut self, method_id: u8, args: &[u8]);
}

impl<F> Subscriber for F
where
    F: FnMut(u8, &[u8]),
{
    fn on_message(&mut self, method_id: u8, args: &[u8]) {
        self(method_id, args)
    }
}

/// Routes records to the subscriber registered for their topic.
///
/// Records for topics nobody subscribed to are counted and skipped, as are
/// records too short to carry a header.
#[derive(Default)]
pub struct TopicDispatcher {
    subscribers: HashMap<u32, Box<dyn Subscriber + Send>>,
    unknown_topics: u64,
    malformed: u64,
}

impl TopicDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any subscriber already registered for `topic_id`.
    pub fn subscribe<S>(&mut self, topic_id: u32, subscriber: S)
    where
        S: Subscriber + Send + 'static,
    {
        self.subscribers.insert(topic_id, Box::new(subscriber));
    }

    pub fn unsubscribe(&mut self, topic_id: u32) -> bool {
        self.subscribers.remove(&topic_id).is_some()
    }

    pub fn unknown_topic_count(&self) -> u64 {
        self.unknown_topics
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

impl RecordHandler for TopicDispatcher {
    fn on_record(&mut self, record: &[u8], page_number: u32, position: u32) {
        let (header, args) = match TopicHeader::decode(record) {
            Ok(decoded) => decoded,
            Err(_) => {
                self.malformed += 1;
                log::warn!(
                    "skipping {} byte record at page {page_number} position {position}",
                    record.len()
                );
                return;
            }
        };
        match self.subscribers.get_mut(&header.topic_id) {
            Some(subscriber) => subscriber.on_message(header.method_id, args),
            None => {
                self.unknown_topics += 1;
                log::trace!(
                    "no subscriber for topic {:#010x} at page {page_number} position {position}",
                    header.topic_id
                );
            }
        }
    }
}
