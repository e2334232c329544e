//! Sleep queue: who to wake on a timer tick.
//!
//! Sorted by ascending `wake_tick` so the timer-interrupt wake pass only
//! has to look at the front of the queue (§3, §8 "timed-sleep ordering").

extern crate alloc;
use alloc::vec::Vec;

use crate::thread::ThreadRef;

pub struct SleepQueue {
    threads: Vec<ThreadRef>,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self { threads: Vec::new() }
    }

    /// Insert `t`, keeping the queue sorted by ascending `wake_tick`.
    pub fn push(&mut self, t: ThreadRef) {
        let wake = t.wake_tick.load(portable_atomic::Ordering::Acquire);
        let pos = self
            .threads
            .iter()
            .position(|existing| existing.wake_tick.load(portable_atomic::Ordering::Acquire) > wake)
            .unwrap_or(self.threads.len());
        self.threads.insert(pos, t);
    }

    /// Remove and return every thread whose `wake_tick` has arrived,
    /// in wake-order.
    pub fn drain_expired(&mut self, now: u64) -> alloc::vec::Vec<ThreadRef> {
        let split = self
            .threads
            .iter()
            .position(|t| t.wake_tick.load(portable_atomic::Ordering::Acquire) > now)
            .unwrap_or(self.threads.len());
        self.threads.drain(..split).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;
    use crate::mem::PagePool;
    use crate::thread::Tcb;
    use portable_atomic::Ordering;

    #[test]
    fn wakes_in_ascending_tick_order() {
        let pool = PagePool::new();
        let a = Tcb::create(&pool, "a", 31).unwrap();
        let b = Tcb::create(&pool, "b", 31).unwrap();
        let c = Tcb::create(&pool, "c", 31).unwrap();
        a.wake_tick.store(30, Ordering::Release);
        b.wake_tick.store(10, Ordering::Release);
        c.wake_tick.store(20, Ordering::Release);

        let mut q = SleepQueue::new();
        q.push(a);
        q.push(b);
        q.push(c);

        let woken = q.drain_expired(30);
        let ids: alloc::vec::Vec<_> = woken.iter().map(|t| t.id()).collect();
        assert_eq!(ids, alloc::vec![b.id(), c.id(), a.id()]);
    }

    #[test]
    fn drain_expired_leaves_future_sleepers() {
        let pool = PagePool::new();
        let a = Tcb::create(&pool, "a", 31).unwrap();
        a.wake_tick.store(100, Ordering::Release);
        let mut q = SleepQueue::new();
        q.push(a);
        assert!(q.drain_expired(50).is_empty());
        assert_eq!(q.len(), 1);
    }
}
