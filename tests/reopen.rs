use std::sync::Arc;

use tempfile::tempdir;
use transport_buffer::{BufferConfig, Error, PageCache, PageReader, ReaderConfig, StreamingReader};

fn read_all(cache: &Arc<PageCache>) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    let mut reader = StreamingReader::new(
        Arc::clone(cache),
        |record: &[u8], _: u32, _: u32| records.push(record.to_vec()),
        ReaderConfig::one_shot(),
    );
    reader.process().expect("process");
    drop(reader);
    records
}

#[test]
fn reopened_buffer_appends_after_existing_records() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("buffer");
    {
        let cache = PageCache::create(&path, 256).expect("open");
        for i in 0..25u8 {
            cache.append(&[i; 30]).expect("append");
        }
        cache.flush().expect("flush");
    }

    let cache = PageCache::create(&path, 256).expect("reopen");
    let resumed_on = cache.current_page_number();
    assert!(resumed_on > 0);
    for i in 25..30u8 {
        cache.append(&[i; 30]).expect("append");
    }

    let records = read_all(&cache);
    assert_eq!(records.len(), 30);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record, &vec![i as u8; 30]);
    }
}

#[test]
fn reopened_index_tracks_existing_pages() {
    let dir = tempdir().expect("tempdir");
    {
        let cache = PageCache::create(dir.path(), 128).expect("open");
        for _ in 0..10 {
            cache.append(&[7u8; 60]).expect("append");
        }
    }
    let cache = PageCache::create(dir.path(), 128).expect("reopen");
    let highest = cache.current_page_number();
    assert_eq!(cache.index().highest_page_number(), highest as i32);
    for page_number in 0..=highest {
        assert!(cache.is_page_available(page_number));
    }
    assert!(!cache.is_page_available(highest + 1));
}

#[test]
fn config_file_drives_page_size() {
    let dir = tempdir().expect("tempdir");
    let config_path = dir.path().join("buffer.json");
    std::fs::write(&config_path, r#"{"page_size": 1024, "cache_size": 4}"#).expect("write config");
    let config = BufferConfig::from_json_file(&config_path).expect("config");

    let cache = PageCache::open(dir.path().join("log"), config).expect("open");
    assert_eq!(cache.page_size(), 1024);
    assert_eq!(cache.current_page().total_data_size(), 1024);
}

#[test]
fn invalid_config_is_rejected_before_touching_disk() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("log");
    let config = BufferConfig {
        page_size: 1001,
        ..BufferConfig::default()
    };
    assert!(matches!(
        PageCache::open(&path, config),
        Err(Error::InvalidConfig(_))
    ));
    assert!(!path.exists());
}

#[test]
fn claim_lost_in_a_crash_does_not_block_later_records() {
    let dir = tempdir().expect("tempdir");
    {
        let cache = PageCache::create(dir.path(), 4096).expect("open");
        cache.append(b"before").expect("append");
        // Neither committed nor dropped, as if the process died mid-write.
        std::mem::forget(cache.claim(10).expect("claim"));
    }

    let cache = PageCache::create(dir.path(), 4096).expect("reopen");
    cache.append(b"after-1").expect("append after reopen");
    cache.append(b"after-2").expect("append after reopen");

    let records = read_all(&cache);
    assert_eq!(
        records,
        vec![b"before".to_vec(), b"after-1".to_vec(), b"after-2".to_vec()]
    );
}

#[test]
fn read_only_open_leaves_a_sealed_buffer_untouched() {
    let dir = tempdir().expect("tempdir");
    {
        let cache = PageCache::create(dir.path(), 128).expect("open");
        cache.append(&[5u8; 124]).expect("append");
    }
    let page_files = || {
        transport_buffer::filenames::discover_pages(dir.path()).expect("discover")
    };
    assert_eq!(page_files(), vec![0]);

    let pages = PageReader::open(dir.path(), BufferConfig::with_page_size(128)).expect("open");
    let mut records = Vec::new();
    let mut reader = StreamingReader::new(
        pages,
        |record: &[u8], _: u32, _: u32| records.push(record.len()),
        ReaderConfig::one_shot(),
    );
    reader.process().expect("process");
    drop(reader);
    assert_eq!(records, vec![124]);
    assert_eq!(page_files(), vec![0]);
}

#[test]
fn read_only_open_of_a_missing_buffer_creates_nothing() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("never-written");
    let pages = PageReader::open(&path, BufferConfig::default()).expect("open");
    assert!(!pages.is_page_available(0));
    assert!(!path.exists());
}
