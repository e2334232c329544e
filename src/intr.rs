//! Scoped acquisition of interrupt-disabled regions.
//!
//! Every mutation of the ready queue, sleep queue, waiter lists, destruction
//! queue, or a thread's status field must happen with interrupts disabled.
//! Callers either disable explicitly and restore on every exit path (the
//! common case, below), or rely on already running inside an interrupt
//! handler.

use crate::arch::{Arch, DefaultArch};
use portable_atomic::{AtomicBool, Ordering};

/// Whether interrupts are enabled or disabled on this CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    On,
    Off,
}

static IN_HANDLER: AtomicBool = AtomicBool::new(false);

/// Disable interrupts and return the level that was in effect beforehand.
///
/// Pair with [`set_level`] to restore the prior level on every exit path:
///
/// ```ignore
/// let old = intr::disable();
/// // critical section
/// intr::set_level(old);
/// ```
#[inline]
pub fn disable() -> Level {
    let prior = get_level();
    DefaultArch::disable_interrupts();
    prior
}

/// Restore a previously saved interrupt level.
#[inline]
pub fn set_level(level: Level) {
    match level {
        Level::On => DefaultArch::enable_interrupts(),
        Level::Off => DefaultArch::disable_interrupts(),
    }
}

/// Query the current interrupt level without changing it.
#[inline]
pub fn get_level() -> Level {
    if DefaultArch::interrupts_enabled() {
        Level::On
    } else {
        Level::Off
    }
}

/// Whether the calling code is running inside an interrupt handler.
///
/// Blocking primitives (`sema_down`, `lock_acquire`, `cond_wait`,
/// `timer_sleep`) assert this is `false`: a handler must never sleep.
#[inline]
pub fn in_handler() -> bool {
    IN_HANDLER.load(Ordering::Acquire)
}

/// RAII-free entry/exit markers used by the architecture's IRQ dispatch path.
///
/// # Safety
///
/// Must be called in matching pairs that bracket the entire body of an
/// interrupt handler, with no blocking operation in between.
pub(crate) unsafe fn enter_handler() {
    IN_HANDLER.store(true, Ordering::Release);
}

pub(crate) unsafe fn leave_handler() {
    IN_HANDLER.store(false, Ordering::Release);
}

/// Scoped guard that disables interrupts on construction and restores the
/// prior level on drop. Convenience wrapper around [`disable`]/[`set_level`]
/// for critical sections with a single exit path.
pub struct InterruptGuard {
    prior: Level,
}

impl InterruptGuard {
    #[inline]
    pub fn new() -> Self {
        Self { prior: disable() }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        set_level(self.prior);
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;

    #[test]
    fn disable_then_set_level_round_trips() {
        let before = get_level();
        let prior = disable();
        assert_eq!(prior, before);
        set_level(prior);
        assert_eq!(get_level(), before);
    }
}
