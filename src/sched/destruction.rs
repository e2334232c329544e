//! Destruction queue: deferred page frees for exited threads.
//!
//! A thread cannot free its own page on exit — it is still running on that
//! page's stack. `thread_exit` instead marks itself `Dying` and pushes onto
//! this FIFO queue; the next `do_schedule` call (running on a *different*
//! thread's stack) drains it and returns each page to the pool (§4.3, §9
//! "Deferred destruction").

extern crate alloc;
use alloc::collections::VecDeque;

use crate::thread::ThreadRef;

pub struct DestructionQueue {
    pending: VecDeque<ThreadRef>,
}

impl DestructionQueue {
    pub const fn new() -> Self {
        Self { pending: VecDeque::new() }
    }

    pub fn push(&mut self, t: ThreadRef) {
        self.pending.push_back(t);
    }

    pub fn drain(&mut self) -> alloc::vec::Vec<ThreadRef> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for DestructionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;
    use crate::mem::PagePool;
    use crate::thread::Tcb;

    #[test]
    fn drain_returns_in_fifo_order_and_empties() {
        let pool = PagePool::new();
        let a = Tcb::create(&pool, "a", 31).unwrap();
        let b = Tcb::create(&pool, "b", 31).unwrap();
        let mut q = DestructionQueue::new();
        q.push(a);
        q.push(b);
        let drained = q.drain();
        assert_eq!(drained.iter().map(|t| t.id()).collect::<alloc::vec::Vec<_>>(), alloc::vec![a.id(), b.id()]);
        assert!(q.is_empty());
    }
}
