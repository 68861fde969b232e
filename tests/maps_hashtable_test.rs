// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_runtime::maps::hashtable

use bpf_runtime::maps::{BpfMap, BpfMapAttr, BpfMapType, MapUpdateFlag};
use bpf_runtime::BpfError;

fn new_map() -> BpfMap {
    BpfMap::new(&BpfMapAttr {
        map_type: BpfMapType::HashTable,
        key_size: 4,
        value_size: 4,
        max_entries: 100,
        flags: 0,
    })
    .unwrap()
}

fn k(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

#[test]
fn test_correct_update() {
    let map = new_map();
    assert!(map.update_from_user(&k(50), &k(100), MapUpdateFlag::Any).is_ok());
}

#[test]
fn test_update_more_than_max_entries() {
    let map = new_map();

    for i in 0..100u32 {
        map.update_from_user(&k(i), &k(i), MapUpdateFlag::Any).unwrap();
    }

    let err = map.update_from_user(&k(100), &k(100), MapUpdateFlag::Any);
    assert_eq!(err, Err(BpfError::NoCapacity));
}

#[test]
fn test_update_existing_element_with_noexist_flag() {
    let map = new_map();

    map.update_from_user(&k(50), &k(100), MapUpdateFlag::Any).unwrap();

    let err = map.update_from_user(&k(50), &k(100), MapUpdateFlag::NoExist);
    assert_eq!(err, Err(BpfError::AlreadyExists));
}

#[test]
fn test_update_non_existing_element_with_noexist_flag() {
    let map = new_map();
    assert!(map.update_from_user(&k(50), &k(100), MapUpdateFlag::NoExist).is_ok());
}

#[test]
fn test_update_non_existing_element_with_exist_flag() {
    let map = new_map();

    let err = map.update_from_user(&k(50), &k(100), MapUpdateFlag::Exist);
    assert_eq!(err, Err(BpfError::NotFound));
}

#[test]
fn test_update_existing_element_with_exist_flag() {
    let map = new_map();

    map.update_from_user(&k(50), &k(100), MapUpdateFlag::Any).unwrap();
    map.update_from_user(&k(50), &k(101), MapUpdateFlag::Exist).unwrap();

    let value = map.lookup_from_user(&k(50)).unwrap();
    assert_eq!(u32::from_le_bytes(value.try_into().unwrap()), 101);
}

#[test]
fn test_insert_then_lookup() {
    let map = new_map();

    map.update_from_user(&k(7), &k(777), MapUpdateFlag::Any).unwrap();
    let value = map.lookup_from_user(&k(7)).unwrap();
    assert_eq!(u32::from_le_bytes(value.try_into().unwrap()), 777);

    assert_eq!(map.lookup_from_user(&k(8)), Err(BpfError::NotFound));
}

#[test]
fn test_overwrite_then_lookup() {
    let map = new_map();

    map.update_from_user(&k(1), &k(10), MapUpdateFlag::Any).unwrap();
    map.update_from_user(&k(1), &k(20), MapUpdateFlag::Any).unwrap();

    let value = map.lookup_from_user(&k(1)).unwrap();
    assert_eq!(u32::from_le_bytes(value.try_into().unwrap()), 20);
}

#[test]
fn test_delete() {
    let map = new_map();

    map.update_from_user(&k(5), &k(55), MapUpdateFlag::Any).unwrap();
    map.delete_from_user(&k(5)).unwrap();

    assert_eq!(map.lookup_from_user(&k(5)), Err(BpfError::NotFound));
    assert_eq!(map.delete_from_user(&k(5)), Err(BpfError::NotFound));
}

#[test]
fn test_delete_then_reinsert_at_capacity() {
    let map = new_map();

    for i in 0..100u32 {
        map.update_from_user(&k(i), &k(i), MapUpdateFlag::Any).unwrap();
    }
    map.delete_from_user(&k(0)).unwrap();

    // The freed slot is usable again.
    map.update_from_user(&k(200), &k(200), MapUpdateFlag::Any).unwrap();
    assert_eq!(
        map.update_from_user(&k(201), &k(201), MapUpdateFlag::Any),
        Err(BpfError::NoCapacity)
    );
}

#[test]
fn test_get_next_key_enumerates_live_keys_once() {
    let map = new_map();

    for i in 0..60u32 {
        map.update_from_user(&k(i), &k(i), MapUpdateFlag::Any).unwrap();
    }
    for i in (0..60u32).step_by(2) {
        map.delete_from_user(&k(i)).unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    let mut key = [0u8; 4];
    let mut prev: Option<[u8; 4]> = None;
    loop {
        match map.get_next_key(prev.as_ref().map(|p| &p[..]), &mut key) {
            Ok(()) => {
                assert!(seen.insert(u32::from_le_bytes(key)), "key visited twice");
                prev = Some(key);
            }
            Err(BpfError::NotFound) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(seen.len(), 30);
    assert!(seen.iter().all(|v| v % 2 == 1));
}

#[test]
fn test_get_next_key_on_empty_map() {
    let map = new_map();
    let mut key = [0u8; 4];
    assert_eq!(map.get_next_key(None, &mut key), Err(BpfError::NotFound));
}

#[test]
fn test_large_keys_and_values() {
    let map = BpfMap::new(&BpfMapAttr {
        map_type: BpfMapType::HashTable,
        key_size: 64,
        value_size: 256,
        max_entries: 10,
        flags: 0,
    })
    .unwrap();

    let key = [0xabu8; 64];
    let value = [0x5au8; 256];
    map.update_from_user(&key, &value, MapUpdateFlag::Any).unwrap();
    assert_eq!(map.lookup_from_user(&key).unwrap(), value.to_vec());
}

#[test]
fn test_concurrent_updates_respect_capacity() {
    use std::sync::Arc;
    use std::thread;

    let map = Arc::new(BpfMap::new(&BpfMapAttr {
        map_type: BpfMapType::HashTable,
        key_size: 4,
        value_size: 4,
        max_entries: 64,
        flags: 0,
    })
    .unwrap());

    let mut workers = Vec::new();
    for t in 0..4u32 {
        let map = map.clone();
        workers.push(thread::spawn(move || {
            for i in 0..64u32 {
                let _ = map.update_from_user(&k(t * 1000 + i), &k(i), MapUpdateFlag::Any);
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }

    // Never more than max_entries live keys.
    let mut count = 0;
    let mut key = [0u8; 4];
    let mut prev: Option<[u8; 4]> = None;
    while map
        .get_next_key(prev.as_ref().map(|p| &p[..]), &mut key)
        .is_ok()
    {
        count += 1;
        prev = Some(key);
        assert!(count <= 64);
    }
    assert!(count > 0);
}
