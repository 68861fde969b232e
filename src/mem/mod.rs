//! Memory management for the BPF runtime.
//!
//! This module contains the fixed-block allocator that backs map entries
//! and the process-wide epoch capability that defers their reclamation.

pub mod allocator;
pub mod epoch;

pub use allocator::BlockAllocator;
pub use epoch::{pin, synchronize, EpochGuard};
