// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_runtime::maps::array

use bpf_runtime::maps::{BpfMap, BpfMapAttr, BpfMapType, MapUpdateFlag};
use bpf_runtime::BpfError;

fn new_map(max_entries: u32) -> BpfMap {
    BpfMap::new(&BpfMapAttr {
        map_type: BpfMapType::Array,
        key_size: 4,
        value_size: 8,
        max_entries,
        flags: 0,
    })
    .unwrap()
}

fn k(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn v(x: u64) -> [u8; 8] {
    x.to_le_bytes()
}

#[test]
fn test_key_size_must_be_four() {
    let err = BpfMap::new(&BpfMapAttr {
        map_type: BpfMapType::Array,
        key_size: 8,
        value_size: 8,
        max_entries: 4,
        flags: 0,
    });
    assert!(matches!(err, Err(BpfError::InvalidKeySize(8))));
}

#[test]
fn test_insert_then_lookup() {
    let map = new_map(16);

    map.update_from_user(&k(3), &v(0xdead_beef), MapUpdateFlag::Any).unwrap();
    let out = map.lookup_from_user(&k(3)).unwrap();
    assert_eq!(u64::from_le_bytes(out.try_into().unwrap()), 0xdead_beef);

    assert_eq!(map.lookup_from_user(&k(4)), Err(BpfError::NotFound));
}

#[test]
fn test_overwrite_then_lookup() {
    let map = new_map(16);

    map.update_from_user(&k(0), &v(1), MapUpdateFlag::Any).unwrap();
    map.update_from_user(&k(0), &v(2), MapUpdateFlag::Any).unwrap();

    let out = map.lookup_from_user(&k(0)).unwrap();
    assert_eq!(u64::from_le_bytes(out.try_into().unwrap()), 2);
}

#[test]
fn test_update_flags() {
    let map = new_map(16);

    map.update_from_user(&k(1), &v(1), MapUpdateFlag::NoExist).unwrap();
    assert_eq!(
        map.update_from_user(&k(1), &v(1), MapUpdateFlag::NoExist),
        Err(BpfError::AlreadyExists)
    );

    assert_eq!(
        map.update_from_user(&k(2), &v(2), MapUpdateFlag::Exist),
        Err(BpfError::NotFound)
    );
    map.update_from_user(&k(1), &v(9), MapUpdateFlag::Exist).unwrap();
}

#[test]
fn test_index_past_capacity_is_invalid() {
    let map = new_map(4);

    assert!(matches!(
        map.update_from_user(&k(4), &v(0), MapUpdateFlag::Any),
        Err(BpfError::KeyOutOfRange(4))
    ));
    assert!(matches!(
        map.lookup_from_user(&k(1000)),
        Err(BpfError::KeyOutOfRange(1000))
    ));
}

#[test]
fn test_delete_clears_slot() {
    let map = new_map(4);

    map.update_from_user(&k(2), &v(5), MapUpdateFlag::Any).unwrap();
    map.delete_from_user(&k(2)).unwrap();

    assert_eq!(map.lookup_from_user(&k(2)), Err(BpfError::NotFound));
    assert_eq!(map.delete_from_user(&k(2)), Err(BpfError::NotFound));

    // NOEXIST works again on the cleared slot.
    map.update_from_user(&k(2), &v(6), MapUpdateFlag::NoExist).unwrap();
}

#[test]
fn test_get_next_key_ascending() {
    let map = new_map(16);

    for idx in [9u32, 2, 5] {
        map.update_from_user(&k(idx), &v(idx as u64), MapUpdateFlag::Any).unwrap();
    }

    let mut collected = Vec::new();
    let mut key = [0u8; 4];
    let mut prev: Option<[u8; 4]> = None;
    while map
        .get_next_key(prev.as_ref().map(|p| &p[..]), &mut key)
        .is_ok()
    {
        collected.push(u32::from_le_bytes(key));
        prev = Some(key);
    }

    assert_eq!(collected, vec![2, 5, 9]);
}

#[test]
fn test_full_capacity() {
    let map = new_map(8);
    for idx in 0..8u32 {
        map.update_from_user(&k(idx), &v(idx as u64), MapUpdateFlag::Any).unwrap();
    }
    for idx in 0..8u32 {
        let out = map.lookup_from_user(&k(idx)).unwrap();
        assert_eq!(u64::from_le_bytes(out.try_into().unwrap()), idx as u64);
    }
}
