//! Hash table map backend
//!
//! A fixed-capacity bucket array of intrusive singly-linked entry chains.
//! Entries are carved from a [`BlockAllocator`] preallocated with exactly
//! `max_entries` blocks, so a full table can never grow past its budget.
//! Deleted entries park on a graveyard and are only recycled after an
//! epoch grace period, keeping interior value pointers alive for pinned
//! readers.

use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::core::error::{BpfError, Result};
use crate::maps::{BpfMapAttr, MapUpdateFlag};
use crate::mem::allocator::BlockAllocator;
use crate::mem::epoch;

/// Fewest buckets a table is created with.
const MIN_BUCKETS: usize = 8;

/// Most buckets a table is created with.
const MAX_BUCKETS: usize = 1 << 20;

/// Chain linkage at the head of every entry block. Key bytes follow the
/// header, value bytes follow the key.
#[repr(C)]
struct EntryHeader {
    next: *mut EntryHeader,
    hash: u32,
}

const HEADER_SIZE: usize = mem::size_of::<EntryHeader>();

pub(crate) struct HashTableMap {
    key_size: usize,
    value_size: usize,
    max_entries: u32,
    bucket_mask: usize,
    buckets: Box<[Mutex<*mut EntryHeader>]>,
    count: AtomicU32,
    allocator: BlockAllocator,
    graveyard: Mutex<Vec<NonNull<EntryHeader>>>,
}

// Chains are only walked and edited under their bucket mutex; entry
// storage outlives unlink by at least one epoch grace period.
unsafe impl Send for HashTableMap {}
unsafe impl Sync for HashTableMap {}

/// FNV-1a over the key bytes. Stable within a process, unseeded.
fn hash_key(key: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in key {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

impl HashTableMap {
    pub(crate) fn new(attr: &BpfMapAttr) -> Result<Self> {
        let nbuckets = (attr.max_entries as usize)
            .next_power_of_two()
            .clamp(MIN_BUCKETS, MAX_BUCKETS);

        let entry_size = HEADER_SIZE + attr.key_size as usize + attr.value_size as usize;
        let align = mem::align_of::<EntryHeader>();
        let block_size = entry_size.div_ceil(align) * align;

        let allocator = BlockAllocator::new(block_size)?;
        allocator.prealloc(attr.max_entries)?;

        let buckets = (0..nbuckets)
            .map(|_| Mutex::new(std::ptr::null_mut()))
            .collect();

        Ok(Self {
            key_size: attr.key_size as usize,
            value_size: attr.value_size as usize,
            max_entries: attr.max_entries,
            bucket_mask: nbuckets - 1,
            buckets,
            count: AtomicU32::new(0),
            allocator,
            graveyard: Mutex::new(Vec::new()),
        })
    }

    fn bucket_of(&self, hash: u32) -> &Mutex<*mut EntryHeader> {
        &self.buckets[hash as usize & self.bucket_mask]
    }

    unsafe fn entry_key<'a>(&self, entry: *const EntryHeader) -> &'a [u8] {
        let base = (entry as *const u8).add(HEADER_SIZE);
        std::slice::from_raw_parts(base, self.key_size)
    }

    fn value_ptr(&self, entry: *mut EntryHeader) -> *mut u8 {
        unsafe { (entry as *mut u8).add(HEADER_SIZE + self.key_size) }
    }

    /// Walk a chain for `key`. Caller holds the bucket lock.
    unsafe fn find(&self, mut head: *mut EntryHeader, hash: u32, key: &[u8]) -> *mut EntryHeader {
        while !head.is_null() {
            if (*head).hash == hash && self.entry_key(head) == key {
                return head;
            }
            head = (*head).next;
        }
        std::ptr::null_mut()
    }

    /// Reserve one element of capacity. Returns false when full.
    fn try_reserve(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c < self.max_entries {
                    Some(c + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Return parked graveyard entries to the free list after a grace
    /// period.
    fn recycle_graveyard(&self) {
        if self.graveyard.lock().unwrap().is_empty() {
            return;
        }
        epoch::synchronize();
        let mut parked = self.graveyard.lock().unwrap();
        for entry in parked.drain(..) {
            self.allocator.free(entry.cast());
        }
    }

    /// Pop an entry block.
    ///
    /// `may_sync` is false on kernel-side updates: the caller is pinned,
    /// so waiting for a grace period would deadlock. The allocator grows
    /// by a segment instead and the extra storage is reclaimed at
    /// teardown.
    fn alloc_entry(&self, may_sync: bool) -> Option<NonNull<EntryHeader>> {
        if may_sync {
            self.recycle_graveyard();
        }
        self.allocator.alloc().map(NonNull::cast)
    }

    pub(crate) fn lookup_copy(&self, key: &[u8]) -> Result<Vec<u8>> {
        let hash = hash_key(key);
        let bucket = self.bucket_of(hash).lock().unwrap();

        let entry = unsafe { self.find(*bucket, hash, key) };
        if entry.is_null() {
            return Err(BpfError::NotFound);
        }

        let mut out = vec![0u8; self.value_size];
        unsafe {
            std::ptr::copy_nonoverlapping(self.value_ptr(entry), out.as_mut_ptr(), self.value_size);
        }
        Ok(out)
    }

    pub(crate) fn lookup_ptr(&self, key: &[u8]) -> Option<NonNull<u8>> {
        let hash = hash_key(key);
        let bucket = self.bucket_of(hash).lock().unwrap();

        let entry = unsafe { self.find(*bucket, hash, key) };
        NonNull::new(entry).map(|e| {
            // The pointer outlives the bucket lock: the caller's epoch pin
            // keeps the entry storage from being recycled.
            unsafe { NonNull::new_unchecked(self.value_ptr(e.as_ptr())) }
        })
    }

    pub(crate) fn update(
        &self,
        key: &[u8],
        value: &[u8],
        flag: MapUpdateFlag,
        may_sync: bool,
    ) -> Result<()> {
        let hash = hash_key(key);

        // Reserve capacity and carve the entry before taking the bucket
        // lock; both may block on their own.
        if flag != MapUpdateFlag::Exist && self.try_reserve() {
            let entry = match self.alloc_entry(may_sync) {
                Some(entry) => entry,
                None => {
                    self.count.fetch_sub(1, Ordering::AcqRel);
                    return Err(BpfError::OutOfMemory);
                }
            };

            unsafe {
                let e = entry.as_ptr();
                (*e).hash = hash;
                std::ptr::copy_nonoverlapping(
                    key.as_ptr(),
                    (e as *mut u8).add(HEADER_SIZE),
                    self.key_size,
                );
                std::ptr::copy_nonoverlapping(value.as_ptr(), self.value_ptr(e), self.value_size);
            }

            let mut bucket = self.bucket_of(hash).lock().unwrap();
            let existing = unsafe { self.find(*bucket, hash, key) };

            if existing.is_null() {
                unsafe { (*entry.as_ptr()).next = *bucket };
                *bucket = entry.as_ptr();
                return Ok(());
            }

            // Key appeared: the reservation and block are surplus. The
            // overwrite happens under the bucket lock so the entry cannot
            // be unlinked underneath it.
            let result = if flag == MapUpdateFlag::NoExist {
                Err(BpfError::AlreadyExists)
            } else {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        value.as_ptr(),
                        self.value_ptr(existing),
                        self.value_size,
                    );
                }
                Ok(())
            };

            drop(bucket);
            self.count.fetch_sub(1, Ordering::AcqRel);
            self.allocator.free(entry.cast());
            return result;
        }

        // No insertion possible: either EXIST semantics or the table is
        // full. Overwriting an existing entry is still allowed.
        let bucket = self.bucket_of(hash).lock().unwrap();
        let existing = unsafe { self.find(*bucket, hash, key) };

        if existing.is_null() {
            return match flag {
                MapUpdateFlag::Exist => Err(BpfError::NotFound),
                _ => Err(BpfError::NoCapacity),
            };
        }
        if flag == MapUpdateFlag::NoExist {
            return Err(BpfError::AlreadyExists);
        }

        unsafe {
            std::ptr::copy_nonoverlapping(value.as_ptr(), self.value_ptr(existing), self.value_size);
        }
        Ok(())
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
        let hash = hash_key(key);
        let mut bucket = self.bucket_of(hash).lock().unwrap();

        unsafe {
            let mut cursor: *mut *mut EntryHeader = &mut *bucket;
            while !(*cursor).is_null() {
                let entry = *cursor;
                if (*entry).hash == hash && self.entry_key(entry) == key {
                    *cursor = (*entry).next;
                    drop(bucket);

                    self.count.fetch_sub(1, Ordering::AcqRel);
                    // Pinned readers may still hold the value pointer;
                    // park the block until a grace period has passed.
                    self.graveyard
                        .lock()
                        .unwrap()
                        .push(NonNull::new_unchecked(entry));
                    return Ok(());
                }
                cursor = &mut (*entry).next;
            }
        }

        Err(BpfError::NotFound)
    }

    pub(crate) fn get_next_key(&self, prev: Option<&[u8]>, out: &mut [u8]) -> Result<()> {
        // Resume right after the previous key when it is still present;
        // a missing previous key restarts from the first key.
        if let Some(prev) = prev {
            let hash = hash_key(prev);
            let idx = hash as usize & self.bucket_mask;
            let bucket = self.buckets[idx].lock().unwrap();
            let entry = unsafe { self.find(*bucket, hash, prev) };

            if !entry.is_null() {
                let next = unsafe { (*entry).next };
                if !next.is_null() {
                    out.copy_from_slice(unsafe { self.entry_key(next) });
                    return Ok(());
                }
                drop(bucket);
                return self.first_key_from(idx + 1, out);
            }
        }

        self.first_key_from(0, out)
    }

    fn first_key_from(&self, start: usize, out: &mut [u8]) -> Result<()> {
        let nbuckets = self.bucket_mask + 1;
        for idx in start..nbuckets {
            let bucket = self.buckets[idx].lock().unwrap();
            let head = *bucket;
            if !head.is_null() {
                out.copy_from_slice(unsafe { self.entry_key(head) });
                return Ok(());
            }
        }
        Err(BpfError::NotFound)
    }
}

impl Drop for HashTableMap {
    fn drop(&mut self) {
        // BpfMap::drop has already synchronized; every entry block can go
        // back to the allocator before it tears its segments down.
        let mut parked = self.graveyard.lock().unwrap();
        for entry in parked.drain(..) {
            self.allocator.free(entry.cast());
        }
        drop(parked);

        for bucket in self.buckets.iter() {
            let mut head = *bucket.lock().unwrap();
            while let Some(entry) = NonNull::new(head) {
                head = unsafe { (*entry.as_ptr()).next };
                self.allocator.free(entry.cast());
            }
        }
    }
}
