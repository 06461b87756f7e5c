//! Cross-module scenarios: open, append, consume, crash recovery, rollover,
//! and concurrent producer/consumer behavior.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use seglog::{Config, Log, LogError, Record};
use tempfile::tempdir;

fn config(max_segment_size: u64) -> Config {
    Config {
        max_segment_size,
        max_sync_lag: -1,
    }
}

#[test]
fn s1_empty_log_open_creates_first_segment() {
    let dir = tempdir().unwrap();
    let log = Log::open_dir(dir.path(), Config::default()).unwrap();
    assert_eq!(log.next_offset(), 1);
    assert!(dir.path().join("00000000000000000001.log").exists());
}

#[test]
fn s2_single_record_round_trip() {
    let dir = tempdir().unwrap();
    let log = Log::open_dir(dir.path(), Config::default()).unwrap();
    let record = Record::new(
        1469067554,
        Some(Bytes::from_static(b"key")),
        Some(Bytes::from_static(b"data")),
    );
    let offset = log.append(&record).unwrap();
    assert_eq!(offset, 1);

    let on_disk = std::fs::read(dir.path().join("00000000000000000001.log")).unwrap();
    assert_eq!(&on_disk[0..8], &1u64.to_be_bytes());
    assert_eq!(&on_disk[8..12], &29u32.to_be_bytes());

    let mut consumer = log.consumer(1).unwrap();
    let (offset, got) = consumer.next().unwrap();
    assert_eq!(offset, 1);
    assert_eq!(got, record);
}

#[test]
fn s3_cross_segment_consume() {
    let dir = tempdir().unwrap();
    let log = Log::open_dir(dir.path(), config(200)).unwrap();
    for i in 0..100u32 {
        let payload = Bytes::copy_from_slice(&i.to_be_bytes());
        log.append(&Record::new(Record::now_seconds(), None, Some(payload)))
            .unwrap();
    }

    let segment_count = std::fs::read_dir(dir.path()).unwrap().count();
    assert!(segment_count >= 2, "expected rollover to have occurred");

    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let len = entry.unwrap().metadata().unwrap().len();
        assert!(len <= 200 + 41, "segment exceeded max size plus one record");
    }

    let mut consumer = log.consumer(1).unwrap();
    for expected_offset in 1..=100u64 {
        let (offset, record) = consumer.next().unwrap();
        assert_eq!(offset, expected_offset);
        let expected_payload = ((expected_offset - 1) as u32).to_be_bytes();
        assert_eq!(record.payload.unwrap().as_ref(), expected_payload);
    }
}

#[test]
fn s4_tail_torn_write_recovers() {
    let dir = tempdir().unwrap();
    {
        let log = Log::open_dir(dir.path(), Config::default()).unwrap();
        for _ in 0..10 {
            log.append(&Record::new(
                Record::now_seconds(),
                None,
                Some(Bytes::from_static(b"payload")),
            ))
            .unwrap();
        }
        log.close().unwrap();
    }

    let path = dir.path().join("00000000000000000001.log");
    let original_len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(original_len - 5).unwrap();
    drop(file);

    let log = Log::open_dir(dir.path(), Config::default()).unwrap();
    assert_eq!(log.next_offset(), 10);

    let mut consumer = log.consumer(1).unwrap();
    for expected in 1..10u64 {
        let (offset, _) = consumer.next().unwrap();
        assert_eq!(offset, expected);
    }
}

#[test]
fn s5_tail_follow_wakes_on_append() {
    let dir = tempdir().unwrap();
    let log = Arc::new(Log::open_dir(dir.path(), Config::default()).unwrap());
    let mut consumer = log.consumer(0).unwrap();

    let writer_log = Arc::clone(&log);
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        writer_log
            .append(&Record::new(
                Record::now_seconds(),
                None,
                Some(Bytes::from_static(b"late")),
            ))
            .unwrap()
    });

    let (offset, _) = consumer.next().unwrap();
    assert_eq!(offset, 1);
    writer.join().unwrap();
    assert_eq!(log.next_offset(), 2);
}

#[test]
fn s6_concurrent_consumers_see_identical_sequence() {
    let dir = tempdir().unwrap();
    let log = Arc::new(Log::open_dir(dir.path(), Config::default()).unwrap());
    const N: u64 = 2_000;

    let consumer_threads: Vec<_> = (0..4)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                let mut consumer = log.consumer(1).unwrap();
                let mut seen = Vec::with_capacity(N as usize);
                for _ in 0..N {
                    let (offset, record) = consumer.next().unwrap();
                    seen.push((offset, record.payload.unwrap()));
                }
                seen
            })
        })
        .collect();

    let producer_log = Arc::clone(&log);
    let producer = thread::spawn(move || {
        for i in 0..N {
            let payload = Bytes::copy_from_slice(&i.to_be_bytes());
            producer_log
                .append(&Record::new(Record::now_seconds(), None, Some(payload)))
                .unwrap();
        }
    });
    producer.join().unwrap();

    let results: Vec<_> = consumer_threads
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    for (i, (offset, _)) in results[0].iter().enumerate() {
        assert_eq!(*offset, i as u64 + 1);
    }
    for other in &results[1..] {
        assert_eq!(other, &results[0]);
    }
}

#[test]
fn s7_bad_crc_detection() {
    let dir = tempdir().unwrap();
    let log = Log::open_dir(dir.path(), Config::default()).unwrap();
    log.append(&Record::new(
        Record::now_seconds(),
        None,
        Some(Bytes::from_static(b"first")),
    ))
    .unwrap();
    log.append(&Record::new(
        Record::now_seconds(),
        None,
        Some(Bytes::from_static(b"second")),
    ))
    .unwrap();

    let path = dir.path().join("00000000000000000001.log");
    let mut data = std::fs::read(&path).unwrap();
    data[20] ^= 0xFF; // inside the first record's body, well before the second frame
    std::fs::write(&path, &data).unwrap();

    let mut consumer = log.consumer(1).unwrap();
    let err = consumer.next().unwrap_err();
    assert!(matches!(err, LogError::BadCrc));
}

#[test]
fn consumer_close_unblocks_pending_next() {
    let dir = tempdir().unwrap();
    let log = Arc::new(Log::open_dir(dir.path(), Config::default()).unwrap());
    let mut consumer = log.consumer(1).unwrap();
    let handle = consumer.handle();

    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.close();
    });

    let err = consumer.next().unwrap_err();
    assert!(matches!(err, LogError::Closed));
    closer.join().unwrap();
}

#[test]
fn reopen_after_clean_close_continues_offsets() {
    let dir = tempdir().unwrap();
    {
        let log = Log::open_dir(dir.path(), Config::default()).unwrap();
        log.append(&Record::new(Record::now_seconds(), None, None))
            .unwrap();
        log.append(&Record::new(Record::now_seconds(), None, None))
            .unwrap();
        log.close().unwrap();
    }

    let log = Log::open_dir(dir.path(), Config::default()).unwrap();
    assert_eq!(log.next_offset(), 3);
    let offset = log
        .append(&Record::new(Record::now_seconds(), None, None))
        .unwrap();
    assert_eq!(offset, 3);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_single_bit_flip_is_detected(
            key in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..32)),
            payload in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            ts in any::<i64>(),
            flip_byte in any::<usize>(),
            flip_bit in 0u8..8,
        ) {
            let record = Record::new(ts, key.map(Bytes::from), payload.map(Bytes::from));
            let mut encoded = record.encode().to_vec();
            let byte_index = flip_byte % encoded.len();
            encoded[byte_index] ^= 1u8 << flip_bit;

            let result = Record::decode(bytes::Bytes::from(encoded));
            prop_assert!(result.is_err());
        }
    }
}
