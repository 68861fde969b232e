//! BPF maps: bounded key/value containers shared by host and programs.
//!
//! A map is constructed from a [`BpfMapAttr`], validated here, and backed
//! by one of two concrete stores: a fixed-capacity array indexed by u32,
//! or a fixed-capacity hash table over arbitrary byte-string keys. All
//! operations dispatch on the backend; keys and values are copied in and
//! out, never borrowed from caller buffers.

pub mod array;
pub mod hashtable;

use std::ptr::NonNull;

use bitflags::bitflags;

use crate::core::error::{BpfError, Result};
use crate::core::types::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::mem::epoch::EpochGuard;

use array::ArrayMap;
use hashtable::HashTableMap;

bitflags! {
    /// Map construction flags.
    ///
    /// No bits are currently defined for either backend; unknown bits are
    /// rejected at init.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u32 {}
}

/// The closed set of map types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpfMapType {
    /// Fixed-capacity array indexed by a 32-bit key
    Array,
    /// Fixed-capacity hash table over byte-string keys
    HashTable,
}

impl BpfMapType {
    /// Human-readable type name
    pub fn name(&self) -> &'static str {
        match self {
            BpfMapType::Array => "ARRAY",
            BpfMapType::HashTable => "HASHTABLE",
        }
    }
}

/// Map construction attributes.
///
/// `flags` is carried as the raw wire word and validated against
/// [`MapFlags`] at init.
#[derive(Debug, Clone, Copy)]
pub struct BpfMapAttr {
    /// Backend selector
    pub map_type: BpfMapType,
    /// Key size in bytes
    pub key_size: u32,
    /// Value size in bytes
    pub value_size: u32,
    /// Capacity: live element count never exceeds this
    pub max_entries: u32,
    /// Raw flag word
    pub flags: u32,
}

/// Update-flag argument of [`BpfMap::update_from_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapUpdateFlag {
    /// Insert or overwrite
    Any = 0,
    /// Fail with exists-error if the key is present
    NoExist = 1,
    /// Fail with not-found if the key is absent
    Exist = 2,
}

impl MapUpdateFlag {
    /// Decode the helper-supplied flag word.
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(MapUpdateFlag::Any),
            1 => Some(MapUpdateFlag::NoExist),
            2 => Some(MapUpdateFlag::Exist),
            _ => None,
        }
    }
}

enum MapBackend {
    Array(ArrayMap),
    HashTable(HashTableMap),
}

/// A typed, bounded key→value container.
pub struct BpfMap {
    map_type: BpfMapType,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    flags: MapFlags,
    backend: MapBackend,
}

impl BpfMap {
    /// Validate `attr` and construct the backend.
    pub fn new(attr: &BpfMapAttr) -> Result<Self> {
        if attr.key_size == 0 || attr.key_size > MAX_KEY_SIZE {
            return Err(BpfError::InvalidKeySize(attr.key_size));
        }
        if attr.value_size == 0 || attr.value_size > MAX_VALUE_SIZE {
            return Err(BpfError::InvalidValueSize(attr.value_size));
        }
        if attr.max_entries == 0 {
            return Err(BpfError::InvalidMaxEntries);
        }
        let flags = MapFlags::from_bits(attr.flags).ok_or(BpfError::InvalidFlags(attr.flags))?;

        let backend = match attr.map_type {
            BpfMapType::Array => MapBackend::Array(ArrayMap::new(attr)?),
            BpfMapType::HashTable => MapBackend::HashTable(HashTableMap::new(attr)?),
        };

        Ok(Self {
            map_type: attr.map_type,
            key_size: attr.key_size,
            value_size: attr.value_size,
            max_entries: attr.max_entries,
            flags,
            backend,
        })
    }

    /// Backend type
    pub fn map_type(&self) -> BpfMapType {
        self.map_type
    }

    /// Key size in bytes
    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    /// Value size in bytes
    pub fn value_size(&self) -> u32 {
        self.value_size
    }

    /// Capacity
    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    /// Construction flags
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() == self.key_size as usize {
            Ok(())
        } else {
            Err(BpfError::InvalidKey)
        }
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() == self.value_size as usize {
            Ok(())
        } else {
            Err(BpfError::InvalidValueSize(value.len() as u32))
        }
    }

    /// Copy the value stored under `key` into a fresh buffer.
    pub fn lookup_from_user(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        match &self.backend {
            MapBackend::Array(m) => m.lookup_copy(key),
            MapBackend::HashTable(m) => m.lookup_copy(key),
        }
    }

    /// Return an interior pointer to the value stored under `key`.
    ///
    /// The pointer is valid while `_guard` is alive; entry removal is
    /// deferred past the guard's epoch.
    pub fn lookup_from_kern(&self, key: &[u8], _guard: &EpochGuard) -> Option<NonNull<u8>> {
        if key.len() != self.key_size as usize {
            return None;
        }
        match &self.backend {
            MapBackend::Array(m) => m.lookup_ptr(key),
            MapBackend::HashTable(m) => m.lookup_ptr(key),
        }
    }

    /// Insert or overwrite `key` → `value` per `flag`.
    pub fn update_from_user(&self, key: &[u8], value: &[u8], flag: MapUpdateFlag) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        match &self.backend {
            MapBackend::Array(m) => m.update(key, value, flag),
            MapBackend::HashTable(m) => m.update(key, value, flag, true),
        }
    }

    /// Update from program context.
    ///
    /// Same contract as [`Self::update_from_user`], but never waits for an
    /// epoch grace period: the caller is pinned.
    pub fn update_from_kern(
        &self,
        key: &[u8],
        value: &[u8],
        flag: MapUpdateFlag,
        _guard: &EpochGuard,
    ) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        match &self.backend {
            MapBackend::Array(m) => m.update(key, value, flag),
            MapBackend::HashTable(m) => m.update(key, value, flag, false),
        }
    }

    /// Remove `key`. Not-found if absent.
    pub fn delete_from_user(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        match &self.backend {
            MapBackend::Array(m) => m.delete(key),
            MapBackend::HashTable(m) => m.delete(key),
        }
    }

    /// Delete from program context. Same contract as
    /// [`Self::delete_from_user`].
    pub fn delete_from_kern(&self, key: &[u8], _guard: &EpochGuard) -> Result<()> {
        self.delete_from_user(key)
    }

    /// Write the key following `prev` into `out`.
    ///
    /// `prev = None` yields the first key; not-found past the last.
    /// Iteration order is backend-defined but visits every key present at
    /// the start exactly once when nothing mutates concurrently.
    pub fn get_next_key(&self, prev: Option<&[u8]>, out: &mut [u8]) -> Result<()> {
        if let Some(prev) = prev {
            self.check_key(prev)?;
        }
        if out.len() != self.key_size as usize {
            return Err(BpfError::InvalidKey);
        }
        match &self.backend {
            MapBackend::Array(m) => m.get_next_key(prev, out),
            MapBackend::HashTable(m) => m.get_next_key(prev, out),
        }
    }
}

impl Drop for BpfMap {
    fn drop(&mut self) {
        // Interior pointers handed to kernel-side readers stay valid for
        // their epoch; wait that grace period out before the backend
        // releases storage.
        crate::mem::epoch::synchronize();
    }
}

impl std::fmt::Debug for BpfMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpfMap")
            .field("type", &self.map_type.name())
            .field("key_size", &self.key_size)
            .field("value_size", &self.value_size)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
