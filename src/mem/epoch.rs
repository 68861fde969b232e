//! Process-wide epoch capability
//!
//! Readers that may observe interior map pointers (the VM for the length
//! of one execution, kernel-side lookups) pin the epoch. Writers that
//! want to reclaim storage call [`synchronize`], which blocks until every
//! guard pinned before the call has been dropped. Maps defer entry
//! recycling until after such a grace period.

use std::sync::{OnceLock, RwLock, RwLockReadGuard};

static EPOCH: OnceLock<RwLock<()>> = OnceLock::new();

fn epoch() -> &'static RwLock<()> {
    EPOCH.get_or_init(|| RwLock::new(()))
}

/// A pinned epoch. Interior pointers obtained while the guard is alive
/// stay valid until it is dropped.
pub struct EpochGuard {
    _inner: RwLockReadGuard<'static, ()>,
}

/// Enter the current epoch.
pub fn pin() -> EpochGuard {
    EpochGuard {
        _inner: epoch().read().unwrap_or_else(|e| e.into_inner()),
    }
}

/// Wait for a full grace period: every reader pinned before this call has
/// exited. New readers may pin concurrently; they can no longer observe
/// storage unlinked before the call.
pub fn synchronize() {
    drop(epoch().write().unwrap_or_else(|e| e.into_inner()));
}
