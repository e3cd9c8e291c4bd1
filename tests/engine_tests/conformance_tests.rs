//! Conformance tests for every Engine backend
//!
//! Each test body runs once against InMem and once against a started
//! DiskEngine. These tests verify:
//! - Basic get/put/clear and key validation
//! - Range scans and the KEY_MIN/KEY_MAX sentinels
//! - Batch atomicity, including under a concurrent reader
//! - Shuffle-equivalence of single-op and multi-op batches
//! - Merge order preservation
//! - increment and clear_range

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use stratakv::config::{Attributes, Config, WalSyncStrategy};
use stratakv::engine::{clear_range, encode_int, increment, DiskEngine, Engine, InMem};
use stratakv::merge::MergeValue;
use stratakv::{BatchOp, RawKeyValue, StrataError, KEY_MAX, KEY_MIN};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Run `test` against a fresh instance of every backend
fn run_with_all_engines<F>(test: F)
where
    F: Fn(&dyn Engine),
{
    let in_mem = InMem::new(Attributes::new(["mem"]), 10 << 20);
    test(&in_mem);

    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .attrs(Attributes::new(["ssd"]))
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 64 })
        .memtable_size_limit(4 * 1024) // Small enough to flush during tests
        .max_sstables(4)
        .build();
    let disk = DiskEngine::open(config).unwrap();
    test(&disk);
    disk.close().unwrap();
}

fn appender(bytes: &[u8]) -> Vec<u8> {
    MergeValue::Appender(bytes.to_vec()).encode().unwrap()
}

fn keys_of(rows: &[RawKeyValue]) -> Vec<Vec<u8>> {
    rows.iter().map(|kv| kv.key.clone()).collect()
}

fn put_all(engine: &dyn Engine, keys: &[&[u8]]) {
    for key in keys {
        engine.put(key, b"v").unwrap();
    }
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_put_get_clear() {
    run_with_all_engines(|engine| {
        engine.put(b"dog", b"woof").unwrap();
        assert_eq!(engine.get(b"dog").unwrap(), Some(b"woof".to_vec()));

        engine.clear(b"dog").unwrap();
        assert_eq!(engine.get(b"dog").unwrap(), None);
    });
}

#[test]
fn test_get_missing_key() {
    run_with_all_engines(|engine| {
        assert_eq!(engine.get(b"nobody").unwrap(), None);
    });
}

#[test]
fn test_put_overwrites() {
    run_with_all_engines(|engine| {
        engine.put(b"k", b"one").unwrap();
        engine.put(b"k", b"two").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"two".to_vec()));
    });
}

#[test]
fn test_empty_value_is_present() {
    run_with_all_engines(|engine| {
        engine.put(b"k", b"").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(Vec::new()));
    });
}

#[test]
fn test_clear_missing_key_succeeds() {
    run_with_all_engines(|engine| {
        engine.clear(b"never-written").unwrap();
        assert_eq!(engine.get(b"never-written").unwrap(), None);
    });
}

#[test]
fn test_empty_key_rejected() {
    run_with_all_engines(|engine| {
        assert!(matches!(engine.put(b"", b"v"), Err(StrataError::InvalidKey(_))));
        assert!(matches!(engine.get(b""), Err(StrataError::InvalidKey(_))));
        assert!(matches!(engine.clear(b""), Err(StrataError::InvalidKey(_))));
        assert!(matches!(
            engine.merge(b"", &appender(b"x")),
            Err(StrataError::InvalidKey(_))
        ));
    });
}

#[test]
fn test_reserved_keys_rejected() {
    run_with_all_engines(|engine| {
        assert!(matches!(engine.put(KEY_MAX, b"v"), Err(StrataError::InvalidKey(_))));
        assert!(matches!(
            engine.put(b"\xff\xff\x00", b"v"),
            Err(StrataError::InvalidKey(_))
        ));
        assert!(matches!(engine.get(KEY_MAX), Err(StrataError::InvalidKey(_))));

        // Just below the sentinel is a normal key
        engine.put(b"\xff\xfe\xff", b"v").unwrap();
        assert_eq!(engine.get(b"\xff\xfe\xff").unwrap(), Some(b"v".to_vec()));
    });
}

#[test]
fn test_binary_keys_and_values() {
    run_with_all_engines(|engine| {
        let key: [u8; 5] = [0x00, 0x01, 0x7f, 0x80, 0xfe];
        let value: Vec<u8> = (0..=255u8).collect();
        engine.put(&key, &value).unwrap();
        assert_eq!(engine.get(&key).unwrap(), Some(value));
    });
}

#[test]
fn test_attrs() {
    let in_mem = InMem::new(Attributes::new(["mem", "fast", "mem"]), 1024);
    assert!(in_mem.attrs().contains("mem"));
    assert_eq!(in_mem.attrs().to_string(), "fast:mem");

    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .attrs(Attributes::new(["ssd"]))
        .build();
    let disk = DiskEngine::new(config);
    assert!(disk.attrs().contains("ssd"));
    assert!(!disk.attrs().contains("mem"));
}

#[test]
fn test_in_mem_capacity() {
    let engine = InMem::new(Attributes::default(), 10);
    assert_eq!(engine.max_bytes(), 10);

    engine.put(b"abc", b"1234").unwrap();
    assert_eq!(engine.used_bytes(), 7);

    match engine.write_batch(&[BatchOp::put(b"x".to_vec(), b"yyy".to_vec())]) {
        Err(StrataError::CapacityExceeded { requested, available }) => {
            assert_eq!(requested, 11);
            assert_eq!(available, 10);
        }
        other => panic!("expected capacity error, got {:?}", other),
    }
    assert_eq!(engine.get(b"x").unwrap(), None);
    assert_eq!(engine.used_bytes(), 7);

    // Freeing space in the same batch makes room
    engine
        .write_batch(&[
            BatchOp::delete(b"abc".to_vec()),
            BatchOp::put(b"x".to_vec(), b"yyyyyyyyy".to_vec()),
        ])
        .unwrap();
    assert_eq!(engine.used_bytes(), 10);
    assert_eq!(engine.len(), 1);

    engine.clear(b"x").unwrap();
    assert!(engine.is_empty());
    assert_eq!(engine.used_bytes(), 0);
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_range_and_limit() {
    run_with_all_engines(|engine| {
        put_all(engine, &[b"a", b"b", b"c", b"d", b"e"]);

        let rows = engine.scan(b"b", b"e", 0).unwrap();
        assert_eq!(keys_of(&rows), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        let rows = engine.scan(b"b", b"e", 2).unwrap();
        assert_eq!(keys_of(&rows), vec![b"b".to_vec(), b"c".to_vec()]);

        let rows = engine.scan(b"a", b"z", 1).unwrap();
        assert_eq!(rows, vec![RawKeyValue::new(b"a".to_vec(), b"v".to_vec())]);
    });
}

#[test]
fn test_scan_full_keyspace() {
    run_with_all_engines(|engine| {
        put_all(engine, &[b"\xff\xfe", b"m", b"\x00", b"a", b"zz"]);

        let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
        assert_eq!(
            keys_of(&rows),
            vec![
                b"\x00".to_vec(),
                b"a".to_vec(),
                b"m".to_vec(),
                b"zz".to_vec(),
                b"\xff\xfe".to_vec(),
            ]
        );
    });
}

#[test]
fn test_scan_empty_or_inverted_range() {
    run_with_all_engines(|engine| {
        put_all(engine, &[b"a", b"b"]);
        assert!(engine.scan(b"b", b"b", 0).unwrap().is_empty());
        assert!(engine.scan(b"c", b"a", 0).unwrap().is_empty());
        assert!(engine.scan(b"x", b"y", 0).unwrap().is_empty());
    });
}

#[test]
fn test_scan_skips_cleared_keys() {
    run_with_all_engines(|engine| {
        put_all(engine, &[b"a", b"b", b"c"]);
        engine.clear(b"b").unwrap();

        let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
        assert_eq!(keys_of(&rows), vec![b"a".to_vec(), b"c".to_vec()]);

        // The limit counts live rows only
        let rows = engine.scan(KEY_MIN, KEY_MAX, 2).unwrap();
        assert_eq!(keys_of(&rows), vec![b"a".to_vec(), b"c".to_vec()]);
    });
}

#[test]
fn test_scan_many_keys_sorted_without_duplicates() {
    run_with_all_engines(|engine| {
        // Written in a scrambled order and overwritten once each
        for round in 0..2 {
            for i in (0..300u32).rev().step_by(7).chain((0..300u32).step_by(3)) {
                let key = format!("key{:04}", i);
                engine.put(key.as_bytes(), format!("r{}", round).as_bytes()).unwrap();
            }
        }

        let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
        let keys = keys_of(&rows);
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert!(rows.iter().all(|kv| kv.value == b"r1"));

        let first_ten = engine.scan(KEY_MIN, KEY_MAX, 10).unwrap();
        assert_eq!(first_ten, rows[..10].to_vec());
    });
}

// =============================================================================
// Batch Tests
// =============================================================================

#[test]
fn test_batch_applies_in_order() {
    run_with_all_engines(|engine| {
        engine
            .write_batch(&[
                BatchOp::put(b"a".to_vec(), b"1".to_vec()),
                BatchOp::put(b"b".to_vec(), b"2".to_vec()),
                BatchOp::delete(b"a".to_vec()),
                BatchOp::put(b"c".to_vec(), b"3".to_vec()),
                BatchOp::put(b"b".to_vec(), b"22".to_vec()),
            ])
            .unwrap();

        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"b").unwrap(), Some(b"22".to_vec()));
        assert_eq!(engine.get(b"c").unwrap(), Some(b"3".to_vec()));
    });
}

#[test]
fn test_empty_batch_is_noop() {
    run_with_all_engines(|engine| {
        engine.write_batch(&[]).unwrap();
        assert!(engine.scan(KEY_MIN, KEY_MAX, 0).unwrap().is_empty());
    });
}

#[test]
fn test_batch_with_invalid_key_has_no_effect() {
    run_with_all_engines(|engine| {
        engine.put(b"a", b"old").unwrap();

        let result = engine.write_batch(&[
            BatchOp::put(b"a".to_vec(), b"new".to_vec()),
            BatchOp::put(b"b".to_vec(), b"2".to_vec()),
            BatchOp::put(Vec::new(), b"bad".to_vec()),
        ]);
        assert!(matches!(result, Err(StrataError::InvalidKey(_))));

        assert_eq!(engine.get(b"a").unwrap(), Some(b"old".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);
    });
}

#[test]
fn test_batch_with_bad_operand_has_no_effect() {
    run_with_all_engines(|engine| {
        let result = engine.write_batch(&[
            BatchOp::put(b"a".to_vec(), b"1".to_vec()),
            BatchOp::merge(b"m".to_vec(), b"not a merge value".to_vec()),
        ]);
        assert!(matches!(result, Err(StrataError::Encoding(_))));
        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"m").unwrap(), None);
    });
}

#[test]
fn test_concurrent_reader_never_sees_torn_batch() {
    run_with_all_engines(|engine| {
        const OPS: usize = 10_000;
        let values: Vec<Vec<u8>> = (0..OPS).map(|i| format!("value-{:05}", i).into_bytes()).collect();
        let allowed: HashSet<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
        let ops: Vec<BatchOp> = values
            .iter()
            .map(|v| BatchOp::put(b"hot".to_vec(), v.clone()))
            .collect();

        let done = AtomicBool::new(false);
        crossbeam::scope(|s| {
            let reader = s.spawn(|_| {
                let mut observed = 0usize;
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    if let Some(value) = engine.get(b"hot").unwrap() {
                        assert!(allowed.contains(value.as_slice()), "torn read: {:?}", value);
                        observed += 1;
                    }
                    if finished {
                        return observed;
                    }
                }
            });

            engine.write_batch(&ops).unwrap();
            done.store(true, Ordering::SeqCst);
            reader.join().unwrap();
        })
        .unwrap();

        assert_eq!(engine.get(b"hot").unwrap(), values.last().cloned());
    });
}

// =============================================================================
// Shuffle-Equivalence Tests
// =============================================================================

#[test]
fn test_shuffle_equivalence() {
    run_with_all_engines(|engine| {
        // Every op targets the same key
        let mut ops = vec![
            BatchOp::put(b"x".to_vec(), b"A".to_vec()),
            BatchOp::put(b"x".to_vec(), b"B".to_vec()),
            BatchOp::delete(b"x".to_vec()),
            BatchOp::delete(b"x".to_vec()),
            BatchOp::merge(b"x".to_vec(), appender(b"1")),
            BatchOp::merge(b"x".to_vec(), appender(b"2")),
            BatchOp::merge(b"x".to_vec(), appender(b"3")),
        ];

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            ops.shuffle(&mut rng);

            engine.clear(b"x").unwrap();
            for op in &ops {
                engine.write_batch(std::slice::from_ref(op)).unwrap();
            }
            let sequential = engine.get(b"x").unwrap();

            engine.clear(b"x").unwrap();
            engine.write_batch(&ops).unwrap();
            let batched = engine.get(b"x").unwrap();

            assert_eq!(sequential, batched, "ops: {:?}", ops);
        }
    });
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_preserves_order() {
    run_with_all_engines(|engine| {
        for part in [b"x", b"y", b"z"] {
            engine.merge(b"letters", &appender(part)).unwrap();
        }

        let value = engine.get(b"letters").unwrap().unwrap();
        assert_eq!(
            MergeValue::decode(&value).unwrap(),
            MergeValue::Appender(b"xyz".to_vec())
        );
    });
}

#[test]
fn test_merge_within_batch() {
    run_with_all_engines(|engine| {
        engine.merge(b"k", &appender(b"a")).unwrap();
        engine
            .write_batch(&[
                BatchOp::merge(b"k".to_vec(), appender(b"b")),
                BatchOp::merge(b"k".to_vec(), appender(b"c")),
            ])
            .unwrap();

        let value = engine.get(b"k").unwrap().unwrap();
        assert_eq!(
            MergeValue::decode(&value).unwrap(),
            MergeValue::Appender(b"abc".to_vec())
        );
    });
}

#[test]
fn test_merge_counter_overflow_has_no_effect() {
    run_with_all_engines(|engine| {
        let counter = |n: i64| MergeValue::Counter(n).encode().unwrap();
        engine.merge(b"c", &counter(i64::MAX - 1)).unwrap();

        let result = engine.merge(b"c", &counter(2));
        assert!(matches!(result, Err(StrataError::Overflow { .. })));

        let value = engine.get(b"c").unwrap().unwrap();
        assert_eq!(MergeValue::decode(&value).unwrap(), MergeValue::Counter(i64::MAX - 1));
    });
}

#[test]
fn test_merge_kind_mismatch_rejected() {
    run_with_all_engines(|engine| {
        engine.merge(b"k", &appender(b"a")).unwrap();
        let result = engine.merge(b"k", &MergeValue::Counter(1).encode().unwrap());
        assert!(matches!(result, Err(StrataError::Encoding(_))));
    });
}

// =============================================================================
// Helper Operation Tests
// =============================================================================

#[test]
fn test_increment_sequence() {
    run_with_all_engines(|engine| {
        assert_eq!(increment(engine, b"n", 1).unwrap(), 1);
        assert_eq!(increment(engine, b"n", 1).unwrap(), 2);
        assert_eq!(increment(engine, b"n", 2).unwrap(), 4);
        assert_eq!(increment(engine, b"n", -1).unwrap(), 3);

        match increment(engine, b"n", i64::MAX) {
            Err(StrataError::Overflow { current, delta, .. }) => {
                assert_eq!(current, 3);
                assert_eq!(delta, i64::MAX);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
        assert_eq!(engine.get(b"n").unwrap(), Some(encode_int(3).to_vec()));

        assert_eq!(increment(engine, b"n", 0).unwrap(), 3);
    });
}

#[test]
fn test_increment_zero_on_missing_key_writes_nothing() {
    run_with_all_engines(|engine| {
        assert_eq!(increment(engine, b"fresh", 0).unwrap(), 0);
        assert_eq!(engine.get(b"fresh").unwrap(), None);
    });
}

#[test]
fn test_increment_rejects_non_integer() {
    run_with_all_engines(|engine| {
        engine.put(b"s", b"text").unwrap();
        assert!(matches!(increment(engine, b"s", 1), Err(StrataError::Encoding(_))));
        assert_eq!(engine.get(b"s").unwrap(), Some(b"text".to_vec()));
    });
}

#[test]
fn test_clear_range() {
    run_with_all_engines(|engine| {
        let keys: [&[u8]; 5] = [b"a", b"aa", b"aaa", b"ab", b"abc"];

        put_all(engine, &keys);
        assert_eq!(clear_range(engine, b"aa", b"abc", 0).unwrap(), 3);
        let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
        assert_eq!(keys_of(&rows), vec![b"a".to_vec(), b"abc".to_vec()]);

        put_all(engine, &keys);
        assert_eq!(clear_range(engine, b"aa", b"abc", 2).unwrap(), 2);
        let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
        assert_eq!(
            keys_of(&rows),
            vec![b"a".to_vec(), b"ab".to_vec(), b"abc".to_vec()]
        );
    });
}

#[test]
fn test_clear_range_empty() {
    run_with_all_engines(|engine| {
        put_all(engine, &[b"a"]);
        assert_eq!(clear_range(engine, b"b", b"c", 0).unwrap(), 0);
        assert_eq!(clear_range(engine, b"c", b"a", 0).unwrap(), 0);
        assert_eq!(engine.get(b"a").unwrap(), Some(b"v".to_vec()));
    });
}

// =============================================================================
// Larger Workload Tests
// =============================================================================

#[test]
fn test_many_writes_survive_flushes() {
    run_with_all_engines(|engine| {
        for i in 0..2_000u32 {
            let key = format!("k{:05}", i);
            engine.put(key.as_bytes(), &i.to_be_bytes()).unwrap();
        }
        for i in (0..2_000u32).step_by(2) {
            engine.clear(format!("k{:05}", i).as_bytes()).unwrap();
        }

        assert_eq!(engine.get(b"k00001").unwrap(), Some(1u32.to_be_bytes().to_vec()));
        assert_eq!(engine.get(b"k00002").unwrap(), None);

        let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
        assert_eq!(rows.len(), 1_000);
        assert!(rows.iter().all(|kv| {
            let i: u32 = std::str::from_utf8(&kv.key[1..]).unwrap().parse().unwrap();
            i % 2 == 1 && kv.value == i.to_be_bytes()
        }));
    });
}
