use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

use seglog::{Store, StoreError, StoreOptions};

const SEGMENT_SIZE: u64 = 1024;

fn small_options() -> StoreOptions {
    StoreOptions {
        max_segment_size: SEGMENT_SIZE,
        worker_pool_size: 32,
        ..StoreOptions::default()
    }
}

fn segment_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".seg"))
        .collect();
    names.sort();
    names
}

#[test]
fn merge_collapses_to_a_single_segment_and_preserves_values() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path(), small_options()).unwrap();

    store.put("key1", "value1").unwrap();
    store.put("key2", "value2").unwrap();
    store.put("key3", "value3").unwrap();
    for _ in 0..1000 {
        store.put("key4", "value4").unwrap();
    }
    assert!(segment_files(dir.path()).len() >= 2, "precondition: multiple segments");

    let stats = store.merge().unwrap();
    assert!(stats.input_segments >= 2);
    assert_eq!(stats.live_keys, 4);
    assert!(stats.bytes_written > 0);

    assert_eq!(
        segment_files(dir.path()),
        vec!["0.seg".to_string()],
        "exactly one segment file after merge"
    );

    for (key, value) in [
        ("key1", "value1"),
        ("key2", "value2"),
        ("key3", "value3"),
        ("key4", "value4"),
    ] {
        assert_eq!(store.get(key).unwrap(), value, "after merge, {key}");
    }

    store.put("key5", "value5").unwrap();
    assert_eq!(store.get("key5").unwrap(), "value5");
}

#[test]
fn merged_segment_holds_one_record_per_live_key() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path(), small_options()).unwrap();

    // 200 overwrites of the same key: only the last survives compaction.
    for i in 0..200 {
        store.put("hot", &format!("v{}", i)).unwrap();
    }
    store.put("cold", "untouched").unwrap();

    let stats = store.merge().unwrap();
    assert_eq!(stats.live_keys, 2);

    let expected = (seglog::record::encode("hot", "v199").unwrap().len()
        + seglog::record::encode("cold", "untouched").unwrap().len()) as u64;
    assert_eq!(stats.bytes_written, expected);
    assert_eq!(fs::metadata(dir.path().join("0.seg")).unwrap().len(), expected);
    assert_eq!(store.get("hot").unwrap(), "v199");
}

#[test]
fn merge_of_an_empty_store_is_harmless() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path(), small_options()).unwrap();

    let stats = store.merge().unwrap();
    assert_eq!(stats.live_keys, 0);
    assert_eq!(segment_files(dir.path()), vec!["0.seg".to_string()]);

    assert!(matches!(store.get("anything").unwrap_err(), StoreError::NotFound));
    store.put("key", "value").unwrap();
    assert_eq!(store.get("key").unwrap(), "value");
}

#[test]
fn repeated_merges_are_stable() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path(), small_options()).unwrap();

    for i in 0..100 {
        store.put(&format!("key{}", i % 10), &format!("value{}", i)).unwrap();
    }
    store.merge().unwrap();
    let first = fs::metadata(dir.path().join("0.seg")).unwrap().len();
    store.merge().unwrap();
    let second = fs::metadata(dir.path().join("0.seg")).unwrap().len();

    assert_eq!(first, second, "a second merge rewrites the same live set");
    for i in 90..100 {
        let key = format!("key{}", i % 10);
        assert_eq!(store.get(&key).unwrap(), format!("value{}", i));
    }
}

#[test]
fn merged_state_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(dir.path(), small_options()).unwrap();
        for _ in 0..500 {
            store.put("a", "1").unwrap();
            store.put("b", "2").unwrap();
        }
        store.merge().unwrap();
        store.close().unwrap();
    }

    let store = Store::open(dir.path(), small_options()).unwrap();
    assert_eq!(store.get("a").unwrap(), "1");
    assert_eq!(store.get("b").unwrap(), "2");
    assert_eq!(store.live_keys(), 2);
}

#[test]
fn writes_racing_a_merge_are_never_lost() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), small_options()).unwrap());
    let keys: Vec<String> = (0..8).map(|i| format!("key{}", i)).collect();

    let writer = {
        let store = Arc::clone(&store);
        let keys = keys.clone();
        thread::spawn(move || {
            for round in 0..200 {
                for key in &keys {
                    store.put(key, &format!("round{}", round)).unwrap();
                }
            }
        })
    };

    // Merges interleave with the writer; the writer loop serializes them,
    // so no acknowledged put may disappear.
    for _ in 0..20 {
        store.merge().unwrap();
    }
    writer.join().unwrap();
    store.merge().unwrap();

    for key in &keys {
        assert_eq!(store.get(key).unwrap(), "round199", "{key} lost its last write");
    }
    assert_eq!(segment_files(dir.path()), vec!["0.seg".to_string()]);
}
