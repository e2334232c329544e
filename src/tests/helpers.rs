//! Shared test harness utilities.
//!
//! There's exactly one kernel singleton per process (§4.2), so tests don't
//! get a fresh instance each — `ensure_kernel` brings it up once and every
//! test after that shares its ready/sleep queues. Tests assert on relative
//! ordering among threads they themselves create rather than assuming an
//! empty queue.

use crate::kernel;

pub fn ensure_kernel() {
    if !kernel::is_initialized() {
        kernel::init("main");
    }
}

pub fn noop_entry(_arg: usize) {}
