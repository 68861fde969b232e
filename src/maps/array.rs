//! Array map backend
//!
//! Keys are 32-bit indices; storage is one contiguous buffer of
//! `max_entries * value_size` bytes plus an occupancy bitmap of atomic
//! words. Capacity is strict: an index at or past `max_entries` is an
//! invalid argument, so the backend can never hold more than
//! `max_entries` elements.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{BpfError, Result};
use crate::maps::{BpfMapAttr, MapUpdateFlag};

/// Array key size: a single little-endian u32 index.
pub const ARRAY_KEY_SIZE: u32 = 4;

pub(crate) struct ArrayMap {
    value_size: usize,
    max_entries: u32,
    values: UnsafeCell<Box<[u8]>>,
    occupied: Box<[AtomicU64]>,
}

// Slot occupancy is published through the atomic bitmap; value bytes are
// copied in before the occupancy bit is released and programs may write
// them through helper-returned pointers, which is why they live in an
// UnsafeCell.
unsafe impl Send for ArrayMap {}
unsafe impl Sync for ArrayMap {}

impl ArrayMap {
    pub(crate) fn new(attr: &BpfMapAttr) -> Result<Self> {
        if attr.key_size != ARRAY_KEY_SIZE {
            return Err(BpfError::InvalidKeySize(attr.key_size));
        }

        let len = attr.max_entries as usize * attr.value_size as usize;
        let words = (attr.max_entries as usize).div_ceil(64);
        let occupied = (0..words).map(|_| AtomicU64::new(0)).collect();

        Ok(Self {
            value_size: attr.value_size as usize,
            max_entries: attr.max_entries,
            values: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
            occupied,
        })
    }

    fn index(&self, key: &[u8]) -> Result<u32> {
        let idx = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
        if idx < self.max_entries {
            Ok(idx)
        } else {
            Err(BpfError::KeyOutOfRange(idx))
        }
    }

    fn is_set(&self, idx: u32) -> bool {
        let word = self.occupied[idx as usize / 64].load(Ordering::Acquire);
        word & (1 << (idx % 64)) != 0
    }

    fn slot_ptr(&self, idx: u32) -> *mut u8 {
        // idx < max_entries was checked in index()
        unsafe { (*self.values.get()).as_mut_ptr().add(idx as usize * self.value_size) }
    }

    pub(crate) fn lookup_copy(&self, key: &[u8]) -> Result<Vec<u8>> {
        let idx = self.index(key)?;
        if !self.is_set(idx) {
            return Err(BpfError::NotFound);
        }

        let mut out = vec![0u8; self.value_size];
        unsafe {
            std::ptr::copy_nonoverlapping(self.slot_ptr(idx), out.as_mut_ptr(), self.value_size);
        }
        Ok(out)
    }

    pub(crate) fn lookup_ptr(&self, key: &[u8]) -> Option<NonNull<u8>> {
        let idx = self.index(key).ok()?;
        if !self.is_set(idx) {
            return None;
        }
        NonNull::new(self.slot_ptr(idx))
    }

    pub(crate) fn update(&self, key: &[u8], value: &[u8], flag: MapUpdateFlag) -> Result<()> {
        let idx = self.index(key)?;
        let set = self.is_set(idx);

        match flag {
            MapUpdateFlag::NoExist if set => return Err(BpfError::AlreadyExists),
            MapUpdateFlag::Exist if !set => return Err(BpfError::NotFound),
            _ => {}
        }

        unsafe {
            std::ptr::copy_nonoverlapping(value.as_ptr(), self.slot_ptr(idx), self.value_size);
        }
        self.occupied[idx as usize / 64].fetch_or(1 << (idx % 64), Ordering::Release);

        Ok(())
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
        let idx = self.index(key)?;
        let mask = 1u64 << (idx % 64);
        let prev = self.occupied[idx as usize / 64].fetch_and(!mask, Ordering::AcqRel);
        if prev & mask == 0 {
            return Err(BpfError::NotFound);
        }
        Ok(())
    }

    pub(crate) fn get_next_key(&self, prev: Option<&[u8]>, out: &mut [u8]) -> Result<()> {
        // A previous key past the end restarts the scan from index 0.
        let start = match prev {
            Some(key) => match self.index(key) {
                Ok(idx) => idx + 1,
                Err(_) => 0,
            },
            None => 0,
        };

        for idx in start..self.max_entries {
            if self.is_set(idx) {
                out.copy_from_slice(&idx.to_le_bytes());
                return Ok(());
            }
        }

        Err(BpfError::NotFound)
    }
}
