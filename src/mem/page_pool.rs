//! Zeroed 4 KiB page allocator.
//!
//! Stands in for the out-of-scope "page allocator" collaborator (§1, §6):
//! `alloc_zeroed_page` / `free_page`. Backed by the global allocator, which
//! in a real bare-metal build is a bump or buddy allocator installed as
//! `#[global_allocator]` by the platform init code; under `std-shim` it is
//! the system allocator, for host-side testing.

use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};

/// Size of a thread's combined TCB+stack page.
pub const PAGE_SIZE: usize = 4096;
const PAGE_ALIGN: usize = 4096;

extern crate alloc;
use alloc::alloc::{alloc_zeroed, dealloc, Layout};

/// Allocator for the 4 KiB pages backing thread control blocks and stacks.
///
/// Pages are never recycled into a free list: a thread's page is returned to
/// the global allocator the moment the destruction queue drains it, rather
/// than pooled, since a kernel thread pool's lifetime is the whole uptime of
/// the system and churn is low compared to a userland thread pool.
pub struct PagePool {
    allocated: AtomicUsize,
    freed: AtomicUsize,
}

impl PagePool {
    pub const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
        }
    }

    fn layout() -> Layout {
        // Layout::from_size_align only fails for non-power-of-two aligns or
        // overflowing sizes; PAGE_SIZE/PAGE_ALIGN are fixed constants that
        // always satisfy both, so unwrap is warranted.
        Layout::from_size_align(PAGE_SIZE, PAGE_ALIGN).unwrap()
    }

    /// Allocate a zeroed 4 KiB page, or `None` if the allocator is exhausted.
    pub fn alloc_zeroed_page(&self) -> Option<NonNull<u8>> {
        let ptr = unsafe { alloc_zeroed(Self::layout()) };
        let ptr = NonNull::new(ptr)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(ptr)
    }

    /// Return a page previously obtained from [`alloc_zeroed_page`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this pool's `alloc_zeroed_page` and
    /// must not be accessed again after this call.
    pub unsafe fn free_page(&self, ptr: NonNull<u8>) {
        unsafe { dealloc(ptr.as_ptr(), Self::layout()) };
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    /// `(pages allocated, pages freed)` since boot, for diagnostics.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.allocated.load(Ordering::Relaxed),
            self.freed.load(Ordering::Relaxed),
        )
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}
