//! Condition variable.
//!
//! Grounded on `cond_init`/`cond_wait`/`cond_signal`/`cond_broadcast`, Mesa
//! style: `signal` only promotes one waiter to ready, it does not hand off
//! execution, so the woken thread must re-check its predicate after
//! `wait` returns rather than assume the condition still holds. Each
//! waiter parks on its own private zero-initialized [`Semaphore`], stored
//! on the waiting thread's own stack frame for the duration of the call;
//! the waiter list holds non-owning pointers to those frames, ranked at
//! signal time by the effective priority of the (single) thread parked on
//! each one.

use core::ptr::NonNull;

use crate::intr::{self, InterruptGuard};
use crate::sync::{lock::Lock, semaphore::Semaphore};

extern crate alloc;
use alloc::vec::Vec;

pub struct CondVar {
    waiters: spin::Mutex<Vec<NonNull<Semaphore>>>,
}

unsafe impl Sync for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        Self { waiters: spin::Mutex::new(Vec::new()) }
    }

    /// Atomically release `lock` and wait to be signaled; re-acquires
    /// `lock` before returning. `lock` must be held by the calling thread.
    pub fn wait(&self, lock: &Lock) {
        assert!(!intr::in_handler(), "cond_wait called from interrupt handler");
        assert!(lock.held_by_current(), "cond_wait called without holding the lock");

        let waiter_sema = Semaphore::new(0);
        {
            let _guard = InterruptGuard::new();
            self.waiters.lock().push(NonNull::from(&waiter_sema));
        }

        lock.release();
        waiter_sema.down();
        lock.acquire();
    }

    /// Wake one waiter, preferring the one whose thread has the highest
    /// effective priority. `lock` must be held by the calling thread.
    pub fn signal(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "cond_signal called without holding the lock");

        let sema_ptr = {
            let _guard = InterruptGuard::new();
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                return;
            }
            waiters.sort_by(|a, b| {
                let pa = unsafe { a.as_ref() }.highest_waiter_priority().unwrap_or(0);
                let pb = unsafe { b.as_ref() }.highest_waiter_priority().unwrap_or(0);
                pb.cmp(&pa)
            });
            waiters.remove(0)
        };

        unsafe { sema_ptr.as_ref() }.up();
    }

    /// Wake every current waiter, highest priority first.
    pub fn broadcast(&self, lock: &Lock) {
        while !self.waiters.lock().is_empty() {
            self.signal(lock);
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
