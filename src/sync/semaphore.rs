//! Counting semaphore.
//!
//! Grounded directly on `sema_init`/`sema_down`/`sema_try_down`/`sema_up`:
//! `down` loops (not `if`s) on the zero check so a thread woken spuriously
//! by an interrupt re-checks and re-enqueues itself rather than assuming
//! the value became positive. The waiter list is re-sorted by effective
//! priority only in `up`, immediately before picking whom to wake — a
//! donation received while a thread already sits in the list can only be
//! observed correctly by sorting right before the pick, not when the
//! thread was first enqueued.

use core::cell::UnsafeCell;

use crate::intr::{self, InterruptGuard};
use crate::kernel;
use crate::thread::ThreadRef;

extern crate alloc;
use alloc::vec::Vec;

pub struct Semaphore {
    value: UnsafeCell<u32>,
    pub(crate) waiters: UnsafeCell<Vec<ThreadRef>>,
}

unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self { value: UnsafeCell::new(value), waiters: UnsafeCell::new(Vec::new()) }
    }

    /// Wait for the value to become positive, then decrement it.
    ///
    /// Must not be called from an interrupt handler.
    pub fn down(&self) {
        assert!(!intr::in_handler(), "sema_down called from interrupt handler");
        let _guard = InterruptGuard::new();
        while unsafe { *self.value.get() } == 0 {
            let cur = kernel::current_thread();
            unsafe { (*self.waiters.get()).push(cur) };
            kernel::block_current();
        }
        unsafe { *self.value.get() -= 1 };
    }

    /// Decrement the value without blocking if it is already positive.
    /// Safe to call from an interrupt handler.
    pub fn try_down(&self) -> bool {
        let _guard = InterruptGuard::new();
        let v = unsafe { &mut *self.value.get() };
        if *v > 0 {
            *v -= 1;
            true
        } else {
            false
        }
    }

    /// Increment the value and wake the highest-effective-priority waiter,
    /// if any. Safe to call from an interrupt handler.
    pub fn up(&self) {
        let _guard = InterruptGuard::new();
        let waiters = unsafe { &mut *self.waiters.get() };
        if !waiters.is_empty() {
            waiters.sort_by(|a, b| b.effective_priority().cmp(&a.effective_priority()));
            let next = waiters.remove(0);
            kernel::unblock(next);
        }
        unsafe { *self.value.get() += 1 };
        kernel::test_preempt();
    }

    /// Highest effective priority among current waiters, without disturbing
    /// their order. Used by condition variables to rank per-waiter
    /// semaphores at signal time.
    pub fn highest_waiter_priority(&self) -> Option<u8> {
        let _guard = InterruptGuard::new();
        unsafe { &*self.waiters.get() }.iter().map(|t| t.effective_priority()).max()
    }

    pub fn value(&self) -> u32 {
        let _guard = InterruptGuard::new();
        unsafe { *self.value.get() }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;

    #[test]
    fn try_down_fails_at_zero_succeeds_when_positive() {
        let s = Semaphore::new(1);
        assert!(s.try_down());
        assert!(!s.try_down());
        s.up();
        assert!(s.try_down());
    }

    #[test]
    fn up_restores_value_after_down() {
        let s = Semaphore::new(0);
        assert_eq!(s.value(), 0);
        s.up();
        assert_eq!(s.value(), 1);
        assert!(s.try_down());
        assert_eq!(s.value(), 0);
    }
}
