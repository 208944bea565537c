//! Tests for the mapped-file and direct-memory backends
//!
//! These tests verify:
//! - Basic load/store/erase/keys behavior
//! - Persistence of mapped stores across reopen (and non-persistence of direct)
//! - Growth by segments up to the maximum, then compaction, then CapacityExceeded
//! - Recovery from a corrupted record
//! - Closed stores reject operations; destroy removes files

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;
use gridstore::store::{DirectMemoryManager, MappedFileManager};
use gridstore::{BinaryStore, BinaryStoreManager, StoreError};
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

// =============================================================================
// Helper Functions
// =============================================================================

fn mapped_manager(dir: &Path, initial: u64, maximum: u64) -> MappedFileManager {
    MappedFileManager::new(initial, maximum, Some(dir)).unwrap()
}

fn sorted_keys(store: &dyn BinaryStore) -> Vec<Bytes> {
    let mut keys: Vec<Bytes> = store.keys().unwrap().collect();
    keys.sort();
    keys
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_store_and_load() {
    let manager = DirectMemoryManager::new(MB, MB);
    let store = manager.create_store().unwrap();

    store.store(b"a", &[1, 2, 3]).unwrap();
    store.store(b"b", b"").unwrap();

    assert_eq!(store.load(b"a").unwrap().as_deref(), Some(&[1u8, 2, 3][..]));
    assert_eq!(store.load(b"b").unwrap().as_deref(), Some(&b""[..]));
    assert_eq!(store.load(b"missing").unwrap(), None);
}

#[test]
fn test_overwrite_replaces_value() {
    let manager = DirectMemoryManager::new(MB, MB);
    let store = manager.open_store().unwrap();

    store.store(b"k", b"first").unwrap();
    store.store(b"k", b"second").unwrap();

    assert_eq!(store.load(b"k").unwrap().as_deref(), Some(&b"second"[..]));
    assert_eq!(store.entry_count(), 1);
}

#[test]
fn test_erase_and_erase_missing() {
    let manager = DirectMemoryManager::new(MB, MB);
    let store = manager.create_store().unwrap();

    store.store(b"k", b"v").unwrap();
    store.erase(b"k").unwrap();
    store.erase(b"never-stored").unwrap();

    assert_eq!(store.load(b"k").unwrap(), None);
}

#[test]
fn test_keys_and_erase_all() {
    let manager = DirectMemoryManager::new(MB, MB);
    let store = manager.create_store().unwrap();

    for i in 0..10u8 {
        store.store(&[i], &[i; 4]).unwrap();
    }
    store.erase(&[3]).unwrap();

    let keys = sorted_keys(store.as_ref());
    assert_eq!(keys.len(), 9);
    assert!(!keys.contains(&Bytes::from_static(&[3])));

    // keys() is restartable
    assert_eq!(store.keys().unwrap().count(), 9);

    store.erase_all().unwrap();
    assert_eq!(store.keys().unwrap().count(), 0);
    assert_eq!(store.load(&[1]).unwrap(), None);
}

#[test]
fn test_stores_are_independent() {
    let manager = DirectMemoryManager::new(MB, MB);
    let first = manager.create_store().unwrap();
    let second = manager.create_store().unwrap();

    first.store(b"k", b"one").unwrap();

    assert_eq!(second.load(b"k").unwrap(), None);
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_mapped_round_trip_across_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let manager = mapped_manager(temp.path(), MB, MB);
        let store = manager.create_store().unwrap();
        store.store(b"a", &[1, 2, 3]).unwrap();
        store.close().unwrap();
    }

    let manager = mapped_manager(temp.path(), MB, MB);
    let store = manager.create_store().unwrap();
    assert_eq!(store.load(b"a").unwrap().as_deref(), Some(&[1u8, 2, 3][..]));
}

#[test]
fn test_mapped_erase_and_overwrite_persist() {
    let temp = TempDir::new().unwrap();

    {
        let manager = mapped_manager(temp.path(), 4096, MB);
        let store = manager.open_store().unwrap();
        store.store(b"gone", b"x").unwrap();
        store.store(b"kept", b"old").unwrap();
        store.store(b"kept", b"new").unwrap();
        store.erase(b"gone").unwrap();
        store.close().unwrap();
    }

    let manager = mapped_manager(temp.path(), 4096, MB);
    let store = manager.open_store().unwrap();

    assert_eq!(store.load(b"gone").unwrap(), None);
    assert_eq!(store.load(b"kept").unwrap().as_deref(), Some(&b"new"[..]));
    assert_eq!(store.entry_count(), 1);
}

#[test]
fn test_mapped_persists_across_segments() {
    let temp = TempDir::new().unwrap();
    let value = [9u8; 500];

    {
        let manager = mapped_manager(temp.path(), 1024, MB);
        let store = manager.open_store().unwrap();
        for i in 0..20u32 {
            store.store(&i.to_be_bytes(), &value).unwrap();
        }
        assert!(store.segment_count() > 1);
        store.close().unwrap();
    }

    let manager = mapped_manager(temp.path(), 1024, MB);
    let store = manager.open_store().unwrap();
    assert_eq!(store.entry_count(), 20);
    for i in 0..20u32 {
        assert_eq!(store.load(&i.to_be_bytes()).unwrap().as_deref(), Some(&value[..]));
    }
}

#[test]
fn test_direct_does_not_persist() {
    {
        let manager = DirectMemoryManager::new(MB, MB);
        let store = manager.create_store().unwrap();
        store.store(b"a", &[1, 2, 3]).unwrap();
        store.close().unwrap();
    }

    let manager = DirectMemoryManager::new(MB, MB);
    let store = manager.create_store().unwrap();
    assert_eq!(store.load(b"a").unwrap(), None);
}

#[test]
fn test_mapped_temp_directory_is_private() {
    let first = MappedFileManager::new(MB, MB, None).unwrap();
    let second = MappedFileManager::new(MB, MB, None).unwrap();

    assert_ne!(first.directory(), second.directory());
    assert!(first.directory().exists());

    let dir = first.directory().to_path_buf();
    drop(first);
    assert!(!dir.exists());
}

#[test]
fn test_mapped_construction_fails_fast() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();

    assert!(MappedFileManager::new(MB, MB, Some(&blocker.join("sub"))).is_err());
}

// =============================================================================
// Capacity
// =============================================================================

#[test]
fn test_grows_within_maximum() {
    let manager = DirectMemoryManager::new(1024, 64 * 1024);
    let store = manager.open_store().unwrap();

    for i in 0..100u32 {
        store.store(&i.to_be_bytes(), &[0u8; 200]).unwrap();
    }

    assert!(store.segment_count() > 1);
    assert!(store.mapped_bytes() <= 64 * 1024);
    assert_eq!(store.entry_count(), 100);
}

#[test]
fn test_capacity_exceeded_when_live_data_too_large() {
    let manager = DirectMemoryManager::new(4096, 4096);
    let store = manager.open_store().unwrap();

    let mut stored = 0u32;
    let err = loop {
        match store.store(&stored.to_be_bytes(), &[1u8; 100]) {
            Ok(()) => stored += 1,
            Err(e) => break e,
        }
    };

    assert!(matches!(err, StoreError::CapacityExceeded { .. }));
    assert!(stored > 0);
    // Everything accepted before the failure is still there
    for i in 0..stored {
        assert!(store.load(&i.to_be_bytes()).unwrap().is_some());
    }
}

#[test]
fn test_record_larger_than_maximum_rejected() {
    let manager = DirectMemoryManager::new(1024, 1024);
    let store = manager.create_store().unwrap();

    let err = store.store(b"big", &[0u8; 2048]).unwrap_err();
    match err {
        StoreError::CapacityExceeded { required, available } => {
            assert!(required > available);
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }
}

#[test]
fn test_compaction_reclaims_overwritten_space() {
    let manager = DirectMemoryManager::new(4096, 4096);
    let store = manager.open_store().unwrap();

    // Far more bytes than fit, but only one live value at a time
    for i in 0..200u32 {
        store.store(b"counter", &[i as u8; 100]).unwrap();
    }

    assert_eq!(store.entry_count(), 1);
    assert_eq!(store.load(b"counter").unwrap().as_deref(), Some(&[199u8; 100][..]));
}

#[test]
fn test_compaction_keeps_other_keys() {
    let manager = DirectMemoryManager::new(8192, 8192);
    let store = manager.open_store().unwrap();

    for i in 0..10u32 {
        store.store(&i.to_be_bytes(), &[i as u8; 50]).unwrap();
    }
    for round in 0..100u32 {
        store.store(b"hot", &round.to_be_bytes().repeat(25)).unwrap();
    }

    for i in 0..10u32 {
        assert_eq!(store.load(&i.to_be_bytes()).unwrap().as_deref(), Some(&[i as u8; 50][..]));
    }
    assert_eq!(
        store.load(b"hot").unwrap().as_deref(),
        Some(&99u32.to_be_bytes().repeat(25)[..])
    );
}

#[test]
fn test_overwrite_of_large_value_reuses_its_space() {
    let manager = DirectMemoryManager::new(4096, 4096);
    let store = manager.open_store().unwrap();

    // More than half the region: the old and new record never fit together
    store.store(b"k", &[1u8; 2500]).unwrap();
    store.store(b"k", &[2u8; 2500]).unwrap();
    store.store(b"k", &[3u8; 2400]).unwrap();

    assert_eq!(store.load(b"k").unwrap().as_deref(), Some(&[3u8; 2400][..]));
    assert_eq!(store.entry_count(), 1);
}

#[test]
fn test_failed_overwrite_keeps_previous_value() {
    let manager = DirectMemoryManager::new(4096, 4096);
    let store = manager.open_store().unwrap();

    store.store(b"k", &[1u8; 2500]).unwrap();
    store.store(b"j", &[9u8; 1000]).unwrap();

    // Fits the region on its own, but not next to "j"
    let err = store.store(b"k", &[2u8; 3100]).unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded { .. }));

    assert_eq!(store.load(b"k").unwrap().as_deref(), Some(&[1u8; 2500][..]));
    assert_eq!(store.load(b"j").unwrap().as_deref(), Some(&[9u8; 1000][..]));
    assert_eq!(store.entry_count(), 2);
}

#[test]
fn test_mapped_overwrite_near_capacity_persists() {
    let temp = TempDir::new().unwrap();

    {
        let manager = mapped_manager(temp.path(), 4096, 4096);
        let store = manager.open_store().unwrap();
        store.store(b"k", &[1u8; 2500]).unwrap();
        store.store(b"k", &[2u8; 2500]).unwrap();
        store.close().unwrap();
    }

    let manager = mapped_manager(temp.path(), 4096, 4096);
    let store = manager.open_store().unwrap();
    assert_eq!(store.load(b"k").unwrap().as_deref(), Some(&[2u8; 2500][..]));
}

#[test]
fn test_erase_frees_space_for_new_keys() {
    let manager = DirectMemoryManager::new(4096, 4096);
    let store = manager.open_store().unwrap();

    let mut keys = Vec::new();
    let mut i = 0u32;
    while store.store(&i.to_be_bytes(), &[0u8; 100]).is_ok() {
        keys.push(i);
        i += 1;
    }
    for key in &keys {
        store.erase(&key.to_be_bytes()).unwrap();
    }

    for key in &keys {
        store.store(&(key + 10_000).to_be_bytes(), &[1u8; 100]).unwrap();
    }
    assert_eq!(store.entry_count(), keys.len());
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_corrupted_record_is_discarded() {
    let temp = TempDir::new().unwrap();

    {
        let manager = mapped_manager(temp.path(), 4096, MB);
        let store = manager.open_store().unwrap();
        store.store(b"first", b"aaaa").unwrap();
        store.store(b"second", b"bbbb").unwrap();
        store.close().unwrap();
    }

    // Flip a byte of the first record's value: 32 byte header, 13 byte
    // record header, 5 byte key
    let segment = temp.path().join("store-0000").join("segment_000001.seg");
    let mut file = OpenOptions::new().write(true).open(&segment).unwrap();
    file.seek(SeekFrom::Start(32 + 13 + 5)).unwrap();
    file.write_all(b"X").unwrap();
    drop(file);

    let manager = mapped_manager(temp.path(), 4096, MB);
    let store = manager.open_store().unwrap();

    assert_eq!(store.load(b"first").unwrap(), None);
    assert_eq!(store.load(b"second").unwrap().as_deref(), Some(&b"bbbb"[..]));
}

#[test]
fn test_bad_segment_header_fails_open() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store-0000");
    std::fs::create_dir_all(&store_dir).unwrap();
    std::fs::write(store_dir.join("segment_000001.seg"), vec![0u8; 4096]).unwrap();

    let manager = mapped_manager(temp.path(), 4096, MB);
    assert!(manager.open_store().is_err());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_closed_store_rejects_operations() {
    let manager = DirectMemoryManager::new(MB, MB);
    let store = manager.create_store().unwrap();
    store.store(b"k", b"v").unwrap();
    store.close().unwrap();

    assert!(matches!(store.load(b"k"), Err(StoreError::Closed)));
    assert!(matches!(store.store(b"k", b"v"), Err(StoreError::Closed)));
    assert!(matches!(store.erase(b"k"), Err(StoreError::Closed)));
    assert!(matches!(store.keys().err(), Some(StoreError::Closed)));

    // Closing twice is fine
    store.close().unwrap();
}

#[test]
fn test_destroy_removes_store_directory() {
    let temp = TempDir::new().unwrap();
    let manager = mapped_manager(temp.path(), 4096, MB);

    let store = manager.create_store().unwrap();
    store.store(b"k", b"v").unwrap();
    let store_dir = temp.path().join("store-0000");
    assert!(store_dir.exists());

    manager.destroy_store(store).unwrap();
    assert!(!store_dir.exists());
}

#[test]
fn test_concurrent_writers_on_distinct_keys() {
    let manager = DirectMemoryManager::new(MB, 16 * MB);
    let store = manager.open_store().unwrap();

    std::thread::scope(|s| {
        for t in 0..4u8 {
            let store = &store;
            s.spawn(move || {
                for i in 0..250u32 {
                    let mut key = vec![t];
                    key.extend_from_slice(&i.to_be_bytes());
                    store.store(&key, &i.to_le_bytes()).unwrap();
                }
            });
        }
    });

    let keys: HashSet<Bytes> = store.keys().unwrap().collect();
    assert_eq!(keys.len(), 1000);
}
