//! Unit tests for the core threading primitives.

#![cfg(all(test, feature = "std-shim"))]

use super::helpers::{ensure_kernel, noop_entry};
use crate::kernel;
use crate::mem::PagePool;
use crate::sync::{CondVar, Lock, Semaphore};
use crate::thread::{Tcb, ThreadStatus, PRI_DEFAULT};

mod thread_tests {
    use super::*;

    #[test]
    fn create_starts_blocked_until_enqueued() {
        let pool = PagePool::new();
        let t = Tcb::create(&pool, "t", PRI_DEFAULT).unwrap();
        assert_eq!(t.status(), ThreadStatus::Blocked);
    }

    #[test]
    fn set_base_priority_updates_effective_when_no_donors() {
        let pool = PagePool::new();
        let t = Tcb::create(&pool, "t", 10).unwrap();
        t.set_base_priority(40);
        assert_eq!(t.base_priority(), 40);
        assert_eq!(t.effective_priority(), 40);
    }

    #[test]
    fn thread_create_assigns_distinct_ids() {
        ensure_kernel();
        let a = kernel::thread_create("a", PRI_DEFAULT, noop_entry, 0).unwrap();
        let b = kernel::thread_create("b", PRI_DEFAULT, noop_entry, 0).unwrap();
        assert_ne!(a, b);
    }
}

mod semaphore_tests {
    use super::*;

    #[test]
    fn initial_value_gates_try_down() {
        let sema = Semaphore::new(0);
        assert!(!sema.try_down());
        sema.up();
        assert!(sema.try_down());
    }

    #[test]
    fn up_without_waiters_just_increments() {
        let sema = Semaphore::new(0);
        sema.up();
        sema.up();
        assert_eq!(sema.value(), 2);
    }
}

mod lock_tests {
    use super::*;

    #[test]
    fn fresh_lock_is_unheld() {
        let lock = Lock::new();
        assert!(!lock.held_by_current());
    }

    #[test]
    fn acquire_via_try_then_release_clears_holder() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        assert!(lock.held_by_current());
        lock.release();
        assert!(!lock.held_by_current());
    }

    #[test]
    #[should_panic(expected = "recursive")]
    fn recursive_try_acquire_panics() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        lock.try_acquire();
    }
}

mod condvar_tests {
    use super::*;

    #[test]
    fn signal_on_empty_waiter_list_is_a_no_op() {
        let lock = Lock::new();
        let cv = CondVar::new();
        lock.try_acquire();
        cv.signal(&lock);
        lock.release();
    }
}
