//! Fixed-size memory block allocator
//!
//! Simple fixed size block allocator with a free list, backing map
//! entries. It does not count allocated blocks; maps limit the number of
//! blocks outside of this allocator. Freed blocks go back on the free
//! list and are only returned to the OS at teardown, so a reader inside
//! an epoch can never observe reclaimed storage.

use std::alloc::{alloc, dealloc, Layout};
use std::mem;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::core::error::{BpfError, Result};

/// Alignment of every handed-out block
const BLOCK_ALIGN: usize = mem::align_of::<*const u8>();

/// One backing allocation, carved into blocks.
///
/// The segment record lives out-of-band (in `segments`), so unlike an
/// intrusive header no bytes of the mapping are reserved for it.
struct Segment {
    ptr: NonNull<u8>,
    layout: Layout,
}

/// Fixed-block slab allocator.
///
/// Aliasing rule: a block is either on the free list or owned by exactly
/// one map entry, never both. All outstanding blocks must be freed before
/// the allocator is dropped.
pub struct BlockAllocator {
    block_size: usize,
    free: Mutex<Vec<NonNull<u8>>>,
    segments: Mutex<Vec<Segment>>,
}

// Raw block pointers are plain byte storage; the mutexes serialise all
// list manipulation.
unsafe impl Send for BlockAllocator {}
unsafe impl Sync for BlockAllocator {}

impl BlockAllocator {
    /// Create an allocator for blocks of `block_size` bytes.
    ///
    /// `block_size` must be a non-zero multiple of pointer alignment.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 || block_size % BLOCK_ALIGN != 0 {
            return Err(BpfError::InvalidBlockSize(block_size));
        }

        Ok(Self {
            block_size,
            free: Mutex::new(Vec::new()),
            segments: Mutex::new(Vec::new()),
        })
    }

    /// The configured block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Grow the free list to at least `nblocks` free blocks.
    pub fn prealloc(&self, nblocks: u32) -> Result<()> {
        if nblocks == 0 {
            return Err(BpfError::InvalidBlockSize(0));
        }

        let mut held = Vec::with_capacity(nblocks as usize);
        for _ in 0..nblocks {
            match self.alloc() {
                Some(block) => held.push(block),
                None => {
                    for block in held {
                        self.free(block);
                    }
                    return Err(BpfError::OutOfMemory);
                }
            }
        }
        for block in held {
            self.free(block);
        }

        Ok(())
    }

    /// Pop a block from the free list, growing by one segment when empty.
    ///
    /// Returns `None` when the backing allocation fails.
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        loop {
            if let Some(block) = self.free.lock().unwrap().pop() {
                return Some(block);
            }
            self.grow()?;
        }
    }

    /// Push a block back onto the free list. Never returns memory to the OS.
    pub fn free(&self, block: NonNull<u8>) {
        self.free.lock().unwrap().push(block);
    }

    /// Map one segment, record it, and carve it into free blocks.
    ///
    /// When the block size exceeds a page the segment holds a single
    /// block. Segment acquisition happens outside the free-list lock.
    fn grow(&self) -> Option<()> {
        let page = page_size();
        let size = page.max(self.block_size + BLOCK_ALIGN);

        let layout = Layout::from_size_align(size, BLOCK_ALIGN).ok()?;
        let base = NonNull::new(unsafe { alloc(layout) })?;

        let mut carved = Vec::new();
        let mut off = 0;
        while off + self.block_size <= size {
            // base is BLOCK_ALIGN-aligned and block_size is a multiple of
            // it, so every carved block stays aligned.
            carved.push(unsafe { NonNull::new_unchecked(base.as_ptr().add(off)) });
            off += self.block_size;
        }

        self.segments
            .lock()
            .unwrap()
            .push(Segment { ptr: base, layout });
        self.free.lock().unwrap().extend(carved);

        Some(())
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        let mut segments = self.segments.lock().unwrap();
        for seg in segments.drain(..) {
            unsafe { dealloc(seg.ptr.as_ptr(), seg.layout) };
        }
    }
}

/// Host page size.
pub fn page_size() -> usize {
    // sysconf cannot fail for _SC_PAGESIZE on any supported host
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}
