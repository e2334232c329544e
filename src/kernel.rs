//! The scheduling core: the single per-CPU kernel singleton.
//!
//! Grounded on the teacher's generic `Kernel<A, S>` (global-registration
//! pattern, `current_thread` tracking, the dual voluntary/IRQ context-switch
//! paths) narrowed to a concrete uniprocessor strict-priority scheduler:
//! `Scheduler`/`RoundRobinScheduler` are gone, replaced by the
//! [`crate::sched`] ready/sleep/destruction queues this design calls for.

use crate::arch::{self, Arch, DefaultArch};
use crate::errors::{SpawnError, ThreadResult};
use crate::intr::{self, InterruptGuard};
use crate::mem::PagePool;
use crate::sched::{DestructionQueue, ReadyQueue, SleepQueue};
use crate::thread::{Tcb, ThreadId, ThreadRef, ThreadStatus};
use crate::time::{TickCounter, TIME_SLICE};

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

struct Kernel {
    pool: PagePool,
    ready: spin::Mutex<ReadyQueue>,
    sleeping: spin::Mutex<SleepQueue>,
    destruction: spin::Mutex<DestructionQueue>,
    current: spin::Mutex<Option<ThreadRef>>,
    idle: spin::Mutex<Option<ThreadRef>>,
    ticks: TickCounter,
    time_slice_ticks: AtomicU32,
    initialized: AtomicBool,
    mlfqs: AtomicBool,
}

unsafe impl Sync for Kernel {}

impl Kernel {
    const fn new() -> Self {
        Self {
            pool: PagePool::new(),
            ready: spin::Mutex::new(ReadyQueue::new()),
            sleeping: spin::Mutex::new(SleepQueue::new()),
            destruction: spin::Mutex::new(DestructionQueue::new()),
            current: spin::Mutex::new(None),
            idle: spin::Mutex::new(None),
            ticks: TickCounter::new(),
            time_slice_ticks: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
            mlfqs: AtomicBool::new(false),
        }
    }
}

static KERNEL: Kernel = Kernel::new();

fn idle_entry(_arg: usize) {
    loop {
        let prior = intr::disable();
        if KERNEL.ready.lock().is_empty() {
            intr::set_level(prior);
            #[cfg(target_arch = "aarch64")]
            unsafe {
                core::arch::asm!("wfe", options(nomem, nostack));
            }
            #[cfg(not(target_arch = "aarch64"))]
            core::hint::spin_loop();
        } else {
            intr::set_level(prior);
            yield_now();
        }
    }
}

/// Bring up the scheduling core: creates the idle thread and marks the
/// calling context as the initial running thread. Must be called exactly
/// once, before any other function in this module.
pub fn init(initial_thread_name: &str) {
    if KERNEL.initialized.swap(true, Ordering::AcqRel) {
        return;
    }

    let initial = Tcb::create(&KERNEL.pool, initial_thread_name, crate::thread::PRI_DEFAULT)
        .expect("out of memory creating the initial thread");
    initial.set_status(ThreadStatus::Running);
    *KERNEL.current.lock() = Some(initial);

    let idle = Tcb::create(&KERNEL.pool, "idle", crate::thread::PRI_MIN)
        .expect("out of memory creating the idle thread");
    idle.setup_initial_context(idle_entry as usize, 0);
    idle.set_status(ThreadStatus::Ready);
    *KERNEL.idle.lock() = Some(idle);
}

pub fn is_initialized() -> bool {
    KERNEL.initialized.load(Ordering::Acquire)
}

/// The thread currently running on this CPU.
///
/// # Panics
/// Panics if called before [`init`].
pub fn current_thread() -> ThreadRef {
    KERNEL.current.lock().expect("threading core not initialized")
}

/// Create a new thread, ready to run at `priority`, starting at `entry(arg)`.
pub fn thread_create(name: &str, priority: u8, entry: fn(usize), arg: usize) -> ThreadResult<ThreadId> {
    if !is_initialized() {
        return Err(SpawnError::NotInitialized);
    }
    let t = Tcb::create(&KERNEL.pool, name, priority).ok_or(SpawnError::OutOfMemory)?;
    t.setup_initial_context(entry as usize, arg);
    let id = t.id();

    let _guard = InterruptGuard::new();
    t.set_status(ThreadStatus::Ready);
    KERNEL.ready.lock().push(t);
    drop(_guard);
    test_preempt();

    Ok(id)
}

/// Move `t` from `Blocked` to `Ready` and enqueue it. Called by
/// synchronization primitives when the resource a thread was waiting for
/// becomes available, and by the timer when a sleep expires. Does not
/// preempt the caller: callers that have disabled interrupts must be able
/// to unblock without losing control (`semaphore::up` wakes the waiter via
/// `unblock` before bumping `value`, then calls `test_preempt` itself once
/// `value` actually reflects the resource being available).
pub fn unblock(t: ThreadRef) {
    let _guard = InterruptGuard::new();
    debug_assert_eq!(t.status(), ThreadStatus::Blocked, "unblock of a non-blocked thread");
    t.set_status(ThreadStatus::Ready);
    KERNEL.ready.lock().push(t);
}

/// Mark the current thread `Blocked` and switch away from it. The caller
/// is responsible for having already recorded *why* it's blocked (pushed
/// onto a semaphore's waiter list, a condvar's waiter list, etc) before
/// calling this — once it returns, the thread has been unblocked again.
pub fn block_current() {
    assert!(!intr::in_handler(), "cannot block from an interrupt handler");
    let _guard = InterruptGuard::new();
    do_schedule(ThreadStatus::Blocked);
}

/// Give up the CPU voluntarily, re-entering the ready queue at the same
/// priority. Unlike [`block_current`], the calling thread remains `Ready`.
pub fn yield_now() {
    let _guard = InterruptGuard::new();
    let cur = current_thread();
    KERNEL.ready.lock().push(cur);
    do_schedule(ThreadStatus::Ready);
}

/// Terminate the current thread. Does not return.
///
/// The thread's page cannot be freed here — it's still executing on that
/// page's stack. `do_schedule` only marks it `Dying`; `schedule` is the one
/// that appends it to the destruction queue, and only after it has already
/// picked a *different* thread to switch to, so the page is freed on some
/// later thread's stack, never this one's.
pub fn exit() -> ! {
    let _guard = InterruptGuard::new();
    do_schedule(ThreadStatus::Dying);
    unreachable!("scheduled thread resumed after exit");
}

/// Change the current thread's base priority, recompute its effective
/// priority against any active donations, and yield if that no longer
/// dominates the ready queue's head.
pub fn set_priority(priority: u8) {
    current_thread().set_base_priority(priority);
    test_preempt();
}

/// If a higher-priority thread than the one currently running is ready,
/// switch to it immediately. Called after any operation that might have
/// made a higher-priority thread ready (thread creation, `unblock`,
/// priority donation).
pub fn test_preempt() {
    let cur_prio = current_thread().effective_priority();
    let should_yield = KERNEL
        .ready
        .lock()
        .peek_highest_priority()
        .is_some_and(|p| p > cur_prio);

    if !should_yield {
        return;
    }

    if intr::in_handler() {
        request_irq_preemption();
    } else {
        yield_now();
    }
}

/// Put the current thread to sleep for `ticks` timer ticks. A non-positive
/// value returns immediately, matching `timer_sleep`'s documented behavior.
pub fn timer_sleep(ticks: i64) {
    assert!(!intr::in_handler(), "timer_sleep called from an interrupt handler");
    if ticks <= 0 {
        return;
    }
    let wake_at = KERNEL.ticks.ticks() + ticks as u64;
    let _guard = InterruptGuard::new();
    let cur = current_thread();
    cur.wake_tick.store(wake_at, Ordering::Release);
    KERNEL.sleeping.lock().push(cur);
    do_schedule(ThreadStatus::Blocked);
}

/// Called from the architecture's timer interrupt handler. Advances the
/// tick counter, wakes any sleepers whose deadline has arrived, and
/// requests a context switch if the running thread has exhausted its time
/// slice or a higher-priority thread is now ready.
///
/// # Safety
/// Must be called from interrupt context with interrupts disabled.
pub fn on_timer_tick() {
    let now = KERNEL.ticks.tick();

    let woken = KERNEL.sleeping.lock().drain_expired(now);
    for t in woken {
        t.set_status(ThreadStatus::Ready);
        KERNEL.ready.lock().push(t);
    }

    let elapsed = KERNEL.time_slice_ticks.fetch_add(1, Ordering::AcqRel) + 1;
    let expired = elapsed >= TIME_SLICE;
    let preempt_needed = expired
        || KERNEL
            .ready
            .lock()
            .peek_highest_priority()
            .is_some_and(|p| p > current_thread().effective_priority());

    if preempt_needed {
        request_irq_preemption();
    }
}

/// `(idle_ticks, kernel_ticks, user_ticks)` — user_ticks is always zero
/// since this core runs no userland.
pub fn cpu_stats() -> (u64, u64, u64) {
    (0, KERNEL.ticks.ticks(), 0)
}

/// Toggle the 4.4BSD multilevel-feedback scheduler flag. The flag is read
/// but never consults by `schedule`; this core implements only the
/// strict-priority scheduler. Mirrors `thread_mlfqs` in the original, which
/// is likewise read at boot but whose scheduling consequences live entirely
/// in code this core doesn't carry.
pub fn set_mlfqs(enabled: bool) {
    KERNEL.mlfqs.store(enabled, Ordering::Release);
}

pub fn mlfqs() -> bool {
    KERNEL.mlfqs.load(Ordering::Acquire)
}

/// Stub: the 4.4BSD scheduler this would feed is out of scope. Matches the
/// original's own `thread_set_nice`/`thread_get_nice`/`thread_get_load_avg`/
/// `thread_get_recent_cpu`, which are likewise unimplemented no-ops
/// returning fixed values.
pub fn set_nice(_nice: i32) {}

pub fn nice() -> i32 {
    0
}

pub fn recent_cpu() -> i32 {
    0
}

pub fn load_avg() -> i32 {
    0
}

/// Drain the destruction queue, transition the current thread to
/// `new_status`, then hand off to [`schedule`]. Every voluntary suspension
/// point (`block_current`, `yield_now`, `exit`, `timer_sleep`) goes through
/// this, never `schedule` directly, so a victim queued by a *previous*
/// `do_schedule` cycle is always freed from some other thread's stack
/// before the current one picks its own status and steps aside.
fn do_schedule(new_status: ThreadStatus) {
    drain_destruction_queue();
    current_thread().set_status(new_status);
    schedule();
}

/// Pick the next ready thread (falling back to idle) and switch to it via
/// a direct, synchronous context switch.
///
/// Precondition: interrupts off, current status already set to something
/// other than `Running` by the caller (`do_schedule` does this). If the
/// outgoing thread is `Dying`, it is appended to the destruction queue here
/// — after `next` has been chosen and is known to differ from `prev` — so
/// its page is never freed while still running on it; the *next*
/// `do_schedule` cycle, running on `next`'s stack, is what frees it.
fn schedule() {
    let prev = current_thread();
    let next = KERNEL.ready.lock().pop_highest().unwrap_or_else(|| {
        KERNEL.idle.lock().expect("idle thread not initialized")
    });

    if next == prev {
        return;
    }

    if prev.status() == ThreadStatus::Dying {
        KERNEL.destruction.lock().push(prev);
    }

    next.set_status(ThreadStatus::Running);
    *KERNEL.current.lock() = Some(next);
    KERNEL.time_slice_ticks.store(0, Ordering::Release);

    let prev_ctx = prev.context_ptr();
    let next_ctx = next.context_ptr();
    unsafe {
        DefaultArch::context_switch(prev_ctx, next_ctx);
    }
}

/// Free the page of every thread the destruction queue is holding. Only
/// safe to call while running on a thread other than the ones being freed
/// — guaranteed here because victims are only ever queued by `schedule`
/// for the *previous* occupant of the CPU, never the one calling this.
fn drain_destruction_queue() {
    for t in KERNEL.destruction.lock().drain() {
        let page = t.as_ref().page_ptr();
        unsafe {
            KERNEL.pool.free_page(page);
        }
    }
}

/// Ask the architecture layer to switch threads on IRQ return rather than
/// synchronously, since a direct `context_switch` cannot run inside a
/// handler (it never returns to the handler's own caller). Mirrors
/// `schedule`'s destruction-queue handling: the drain happens first, and a
/// `Dying` outgoing thread is queued only after `next` is chosen.
#[cfg(target_arch = "aarch64")]
fn request_irq_preemption() {
    drain_destruction_queue();

    let prev = current_thread();
    let next = KERNEL.ready.lock().pop_highest().unwrap_or_else(|| {
        KERNEL.idle.lock().expect("idle thread not initialized")
    });

    if next == prev {
        return;
    }

    if prev.status() == ThreadStatus::Dying {
        KERNEL.destruction.lock().push(prev);
    }

    next.set_status(ThreadStatus::Running);
    *KERNEL.current.lock() = Some(next);
    KERNEL.time_slice_ticks.store(0, Ordering::Release);

    let next_ctx = next.context_ptr();
    arch::aarch64::set_irq_load_context(next_ctx);
}

#[cfg(not(target_arch = "aarch64"))]
fn request_irq_preemption() {
    yield_now();
}

/// Install `t`'s context as both the save and load target for the next
/// IRQ, i.e. "this is what's running when interrupts are (re-)enabled".
/// Called once at boot, after `init`, before the first `sti`.
#[cfg(target_arch = "aarch64")]
pub fn arm_irq_context_for_current() {
    let ctx = current_thread().context_ptr();
    unsafe {
        arch::aarch64::set_current_irq_context(ctx);
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;

    fn ensure_init() {
        if !is_initialized() {
            init("main");
        }
    }

    #[test]
    fn thread_create_enqueues_ready_thread() {
        ensure_init();
        fn noop(_arg: usize) {}
        let id = thread_create("t", crate::thread::PRI_DEFAULT, noop, 0).unwrap();
        assert!(id.get() > 0);
    }

    #[test]
    fn cpu_stats_reports_zero_user_ticks() {
        ensure_init();
        let (_, _, user) = cpu_stats();
        assert_eq!(user, 0);
    }

    /// Regression test for the lost-wakeup bug: `unblock` must not call
    /// `test_preempt`, or a waiter woken while a lock/semaphore's state is
    /// still mid-update (e.g. `Semaphore::up`, before `value` is
    /// incremented) could be switched to immediately, re-observe the stale
    /// state, and re-block forever. `unblock` only ever changes the
    /// woken thread's status and queue membership; `current_thread()` must
    /// stay exactly who it was before the call.
    #[test]
    fn unblock_does_not_preempt_the_caller() {
        ensure_init();
        let before = current_thread();
        let higher = Tcb::create(&KERNEL.pool, "higher", crate::thread::PRI_MAX).unwrap();
        higher.set_status(ThreadStatus::Blocked);

        unblock(higher);

        assert_eq!(current_thread().id(), before.id());
        assert_eq!(higher.status(), ThreadStatus::Ready);
        assert!(KERNEL.ready.lock().pop_highest().is_some_and(|t| t.id() == higher.id()));
    }

    /// Regression test for the destruction-queue use-after-free: a thread
    /// transitioning to `Dying` via `do_schedule` must be appended to the
    /// destruction queue only *after* a different thread has already been
    /// picked to take over, and must not be freed in that same call — only
    /// the *next* `do_schedule` (running on the new thread's stack) may
    /// drain it. Stands in for calling the real (never-returning) `exit`,
    /// by swapping `KERNEL.current` to a disposable thread first and
    /// restoring it afterward so no other test observes the mutation.
    /// Leaves the shared ready queue untouched: `dying` was never enqueued
    /// there, so the scheduler necessarily falls back to idle, which is
    /// guaranteed distinct from `dying` regardless of what else is
    /// concurrently sitting in the ready queue.
    #[test]
    fn dying_thread_is_queued_only_after_a_different_thread_takes_over() {
        ensure_init();
        fn noop(_arg: usize) {}

        let real_current = current_thread();
        let dying = Tcb::create(&KERNEL.pool, "exiting", crate::thread::PRI_MIN).unwrap();
        dying.setup_initial_context(noop as usize, 0);

        *KERNEL.current.lock() = Some(dying);
        do_schedule(ThreadStatus::Dying);

        assert_ne!(current_thread().id(), dying.id());
        assert_eq!(dying.status(), ThreadStatus::Dying);

        let pending = KERNEL.destruction.lock().drain();
        assert!(pending.iter().any(|t| t.id() == dying.id()), "dying thread was not queued");
        // The page is still valid at this point — not freed by the call
        // that queued it. Free it now via the real path (a later
        // `do_schedule`, simulated here directly) to leave the pool
        // unleaked for the rest of the suite.
        for t in pending {
            unsafe { KERNEL.pool.free_page(t.as_ref().page_ptr()) };
        }

        *KERNEL.current.lock() = Some(real_current);
    }
}
