use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use tempfile::tempdir;
use transport_buffer::{PageCache, ReaderConfig, StreamingReader};

fn encode(thread: u32, seq: u32, len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    payload[..4].copy_from_slice(&thread.to_le_bytes());
    payload[4..8].copy_from_slice(&seq.to_le_bytes());
    payload
}

fn decode(record: &[u8]) -> (u32, u32) {
    let mut thread = [0u8; 4];
    let mut seq = [0u8; 4];
    thread.copy_from_slice(&record[..4]);
    seq.copy_from_slice(&record[4..8]);
    (u32::from_le_bytes(thread), u32::from_le_bytes(seq))
}

fn spawn_writers(cache: &Arc<PageCache>, threads: u32, per_thread: u32, len: usize) {
    let barrier = Arc::new(Barrier::new(threads as usize));
    let handles: Vec<_> = (0..threads)
        .map(|thread| {
            let cache = Arc::clone(cache);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for seq in 0..per_thread {
                    cache.append(&encode(thread, seq, len)).expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }
}

#[test]
fn racing_overflow_installs_a_single_page() {
    let dir = tempdir().expect("tempdir");
    let cache = PageCache::create(dir.path(), 4096).expect("open");

    spawn_writers(&cache, 8, 5, 100);

    assert_eq!(cache.current_page_number(), 1);
    assert_eq!(cache.allocator().pages_created(), 2);
    assert_eq!(cache.index().highest_page_number(), 1);
}

#[test]
fn every_record_is_read_once_in_per_writer_order() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 500;
    let dir = tempdir().expect("tempdir");
    let cache = PageCache::create(dir.path(), 256).expect("open");
    let stop = Arc::new(AtomicBool::new(false));

    let reader_thread = {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut next_seq: HashMap<u32, u32> = HashMap::new();
            let mut total = 0u32;
            let stop_when_done = Arc::clone(&stop);
            let handler = |record: &[u8], _: u32, _: u32| {
                let (thread, seq) = decode(record);
                let expected = next_seq.entry(thread).or_insert(0);
                assert_eq!(seq, *expected, "writer {thread} out of order");
                *expected += 1;
                total += 1;
                if total == THREADS * PER_THREAD {
                    stop_when_done.store(true, Ordering::Release);
                }
            };
            let mut reader =
                StreamingReader::new(cache, handler, ReaderConfig::tailing().zero_copy())
                    .with_stop(stop);
            reader.process().expect("tail");
            drop(reader);
            total
        })
    };

    spawn_writers(&cache, THREADS, PER_THREAD, 20);
    let total = reader_thread.join().expect("reader thread");
    assert_eq!(total, THREADS * PER_THREAD);
    assert!(cache.current_page_number() > 64);
}
