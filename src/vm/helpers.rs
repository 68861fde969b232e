//! Helper functions callable from bytecode
//!
//! The CALL immediate selects a helper id. Helpers receive R1..R5 and
//! return in R0. Map handles are passed as attached-map slot indices and
//! resolved through the calling program's map table.

use std::slice;

use crate::core::error::Result;
use crate::maps::MapUpdateFlag;
use crate::mem::epoch::EpochGuard;
use crate::prog::BpfProg;

/// Helper id: `map_lookup_elem(slot, key) -> value_ptr | 0`
pub const HELPER_MAP_LOOKUP_ELEM: i32 = 1;
/// Helper id: `map_update_elem(slot, key, value, flags) -> 0 | -errno`
pub const HELPER_MAP_UPDATE_ELEM: i32 = 2;
/// Helper id: `map_delete_elem(slot, key) -> 0 | -errno`
pub const HELPER_MAP_DELETE_ELEM: i32 = 3;

/// Symbolic name of a helper id, if defined.
pub fn helper_name(id: i32) -> Option<&'static str> {
    match id {
        HELPER_MAP_LOOKUP_ELEM => Some("map_lookup_elem"),
        HELPER_MAP_UPDATE_ELEM => Some("map_update_elem"),
        HELPER_MAP_DELETE_ELEM => Some("map_delete_elem"),
        _ => None,
    }
}

/// Whether `id` names a defined helper.
pub fn helper_exists(id: i32) -> bool {
    helper_name(id).is_some()
}

/// Dispatch a helper call. `args` are R1..R5; the result lands in R0.
///
/// # Safety
///
/// Key/value arguments must point to readable buffers of the map's key
/// and value sizes. The verifier admits the call sites; the buffers come
/// from program-controlled addresses.
pub unsafe fn call(prog: &BpfProg, guard: &EpochGuard, id: i32, args: [u64; 5]) -> u64 {
    match id {
        HELPER_MAP_LOOKUP_ELEM => map_lookup_elem(prog, guard, args[0], args[1]),
        HELPER_MAP_UPDATE_ELEM => {
            map_update_elem(prog, guard, args[0], args[1], args[2], args[3])
        }
        HELPER_MAP_DELETE_ELEM => map_delete_elem(prog, guard, args[0], args[1]),
        // Unknown ids are rejected at verification time.
        _ => 0,
    }
}

fn errno_of(res: Result<()>) -> u64 {
    match res {
        Ok(()) => 0,
        Err(e) => e.to_errno() as u64,
    }
}

unsafe fn map_lookup_elem(prog: &BpfProg, guard: &EpochGuard, slot: u64, key: u64) -> u64 {
    let map = match prog.map_at(slot as u32) {
        Some(map) => map,
        None => return 0,
    };
    if key == 0 {
        return 0;
    }
    let key = slice::from_raw_parts(key as *const u8, map.key_size() as usize);

    match map.lookup_from_kern(key, guard) {
        Some(value) => value.as_ptr() as u64,
        None => 0,
    }
}

unsafe fn map_update_elem(
    prog: &BpfProg,
    guard: &EpochGuard,
    slot: u64,
    key: u64,
    value: u64,
    flags: u64,
) -> u64 {
    let map = match prog.map_at(slot as u32) {
        Some(map) => map,
        None => return (-22i64) as u64, // EINVAL
    };
    let flag = match MapUpdateFlag::from_u64(flags) {
        Some(flag) => flag,
        None => return (-22i64) as u64,
    };
    if key == 0 || value == 0 {
        return (-22i64) as u64;
    }

    let key = slice::from_raw_parts(key as *const u8, map.key_size() as usize);
    let value = slice::from_raw_parts(value as *const u8, map.value_size() as usize);

    errno_of(map.update_from_kern(key, value, flag, guard))
}

unsafe fn map_delete_elem(prog: &BpfProg, guard: &EpochGuard, slot: u64, key: u64) -> u64 {
    let map = match prog.map_at(slot as u32) {
        Some(map) => map,
        None => return (-22i64) as u64,
    };
    if key == 0 {
        return (-22i64) as u64;
    }
    let key = slice::from_raw_parts(key as *const u8, map.key_size() as usize);

    errno_of(map.delete_from_kern(key, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_table() {
        assert!(helper_exists(HELPER_MAP_LOOKUP_ELEM));
        assert!(helper_exists(HELPER_MAP_UPDATE_ELEM));
        assert!(helper_exists(HELPER_MAP_DELETE_ELEM));
        assert!(!helper_exists(0));
        assert!(!helper_exists(4));
        assert_eq!(helper_name(1), Some("map_lookup_elem"));
    }
}
