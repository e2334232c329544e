//! Lock: a binary semaphore with an owner, and priority donation.
//!
//! Grounded on `lock_init`/`lock_acquire`/`lock_try_acquire`/`lock_release`/
//! `lock_held_by_current_thread` — with the donation chain the source
//! leaves commented out actually implemented, per the donation invariant:
//! a thread blocked on a contended lock donates its effective priority to
//! the lock's holder, and the donation propagates transitively through
//! however many locks the chain of holders is itself waiting on, bounded
//! to [`DONATION_DEPTH_LIMIT`] hops to cap the cost of a pathological
//! wait-for graph. Donations are revoked at release time, not continuously.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::intr::{self, InterruptGuard};
use crate::kernel;
use crate::sync::semaphore::Semaphore;
use crate::thread::{ThreadRef, DONATION_DEPTH_LIMIT};

pub struct Lock {
    semaphore: Semaphore,
    holder: UnsafeCell<Option<ThreadRef>>,
}

unsafe impl Sync for Lock {}

impl Lock {
    pub const fn new() -> Self {
        Self { semaphore: Semaphore::new(1), holder: UnsafeCell::new(None) }
    }

    fn holder(&self) -> Option<ThreadRef> {
        unsafe { *self.holder.get() }
    }

    /// Acquire the lock, sleeping if necessary. Must not be called by the
    /// thread that already holds it, and must not be called from an
    /// interrupt handler.
    pub fn acquire(&self) {
        assert!(!intr::in_handler(), "lock_acquire called from interrupt handler");
        let cur = kernel::current_thread();
        assert!(!self.held_by_current(), "recursive lock_acquire");

        {
            let _guard = InterruptGuard::new();
            if let Some(holder) = self.holder() {
                *cur.wait_on_lock.lock() = Some(NonNull::from(self));
                Self::donate_chain(cur, holder, 0);
            }
        }

        self.semaphore.down();

        let _guard = InterruptGuard::new();
        *cur.wait_on_lock.lock() = None;
        unsafe { *self.holder.get() = Some(cur) };
    }

    /// Walk the chain of lock holders starting at `holder`, adding `donor`
    /// to each one's donor set and recomputing effective priority, until
    /// a holder isn't itself blocked on another lock or the depth limit
    /// is reached.
    fn donate_chain(donor: ThreadRef, mut holder: ThreadRef, mut depth: usize) {
        loop {
            if depth >= DONATION_DEPTH_LIMIT || holder == donor {
                return;
            }
            {
                let mut donors = holder.donors.lock();
                if !donors.iter().any(|d| *d == donor) {
                    donors.push(donor);
                }
            }
            holder.recompute_effective_priority();

            let next_lock = *holder.wait_on_lock.lock();
            match next_lock.and_then(|l| unsafe { l.as_ref() }.holder()) {
                Some(next_holder) => {
                    holder = next_holder;
                    depth += 1;
                }
                None => return,
            }
        }
    }

    /// Try to acquire the lock without blocking. Safe to call from an
    /// interrupt handler.
    pub fn try_acquire(&self) -> bool {
        let cur = kernel::current_thread();
        assert!(!self.held_by_current(), "recursive lock_try_acquire");
        if self.semaphore.try_down() {
            unsafe { *self.holder.get() = Some(cur) };
            true
        } else {
            false
        }
    }

    /// Release the lock, which must be held by the current thread.
    pub fn release(&self) {
        let cur = kernel::current_thread();
        assert!(self.held_by_current(), "lock_release by a thread that doesn't hold it");

        {
            let _guard = InterruptGuard::new();
            unsafe { *self.holder.get() = None };
            Self::revoke_donations(cur, self);
        }

        self.semaphore.up();
    }

    /// Remove every donor blocked specifically on `lock` from `holder`'s
    /// donor set and recompute its effective priority. Donors still
    /// waiting on a different lock `holder` also owns are left in place.
    fn revoke_donations(holder: ThreadRef, lock: &Lock) {
        let mut donors = holder.donors.lock();
        donors.retain(|d| {
            let waiting_on = d.wait_on_lock.lock();
            !matches!(*waiting_on, Some(ptr) if core::ptr::eq(ptr.as_ptr(), lock as *const Lock as *mut Lock))
        });
        drop(donors);
        holder.recompute_effective_priority();
    }

    /// Whether the calling thread holds this lock. Checking whether some
    /// *other* thread holds it would be racy on a system that could
    /// context-switch mid-check, so this is the only query offered.
    pub fn held_by_current(&self) -> bool {
        self.holder() == Some(kernel::current_thread())
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_then_release_round_trips_holder() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        assert!(lock.held_by_current());
        lock.release();
        assert!(!lock.held_by_current());
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
    }
}
