//! Thread control blocks and non-owning thread handles.
//!
//! A thread's [`Tcb`] and its kernel stack share a single page allocated from
//! [`crate::mem::PagePool`] (§3, §6): the `Tcb` sits at the base (low
//! address), the stack grows downward from the top of the page toward it.
//! `magic` is the last field of `Tcb`, placing it immediately below the
//! lowest legal stack address — a stack overflow clobbers it first.
//!
//! Threads are referred to everywhere else in the core by [`ThreadRef`], a
//! `Copy`, non-owning pointer handle (`wait_on_lock`, `donors`, queue
//! linkage are all non-owning per the data model). Ownership of the backing
//! page is tracked explicitly by the kernel: allocated in `thread_create`,
//! freed only when the destruction queue drains it in `do_schedule`.

use crate::arch::{Arch, DefaultArch};
use crate::mem::PagePool;
use crate::sync::lock::Lock;
use core::ptr::NonNull;
use portable_atomic::{AtomicU64, AtomicU8, Ordering};

pub mod builder;
pub use builder::ThreadBuilder;

extern crate alloc;
use alloc::vec::Vec;

/// Marker value written into [`Tcb::magic`]; a thread whose `magic` no
/// longer matches this has had its stack overflow into its own control
/// block.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Lowest legal priority.
pub const PRI_MIN: u8 = 0;
/// Priority assigned to threads that don't ask for one explicitly.
pub const PRI_DEFAULT: u8 = 31;
/// Highest legal priority.
pub const PRI_MAX: u8 = 63;

/// Maximum length of priority donation chains walked by [`crate::sync::lock`]
/// before giving up: bounds the cost of a pathological lock-wait graph.
pub const DONATION_DEPTH_LIMIT: usize = 8;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    fn next() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A thread's scheduling state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Currently the one thread executing on the CPU.
    Running = 0,
    /// Runnable, sitting in the ready queue.
    Ready = 1,
    /// Waiting on a semaphore, lock, condition variable, or sleep timeout.
    Blocked = 2,
    /// Exited; its page sits in the destruction queue awaiting free.
    Dying = 3,
}

impl ThreadStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ThreadStatus::Running,
            1 => ThreadStatus::Ready,
            2 => ThreadStatus::Blocked,
            _ => ThreadStatus::Dying,
        }
    }
}

/// Thread control block.
///
/// Allocated at the base of a page obtained from [`PagePool`]; the page's
/// remaining bytes above it are the thread's kernel stack.
#[repr(C)]
pub struct Tcb {
    pub id: ThreadId,
    name: [u8; 16],
    name_len: u8,
    status: AtomicU8,
    base_priority: AtomicU8,
    effective_priority: AtomicU8,
    pub wake_tick: AtomicU64,
    /// Lock this thread is blocked waiting to acquire, if any. Non-owning:
    /// the lock outlives any thread waiting on it.
    pub wait_on_lock: spin::Mutex<Option<NonNull<Lock>>>,
    /// Threads currently donating priority to this thread through a held
    /// lock. Non-owning handles; a donor remains responsible for its own
    /// lifetime.
    pub donors: spin::Mutex<Vec<ThreadRef>>,
    pub context: spin::Mutex<<DefaultArch as Arch>::SavedContext>,
    page: NonNull<u8>,
    magic: u32,
}

unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

/// A `Copy`, non-owning handle to a [`Tcb`].
///
/// Equivalent to a raw `struct thread *` in the source this core is modeled
/// on: every queue (ready, sleep, destruction, waiter lists) links threads
/// by `ThreadRef`, never by ownership. The page a `ThreadRef` points at is
/// freed exactly once, by the destruction queue drain in
/// `crate::kernel::do_schedule`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadRef(NonNull<Tcb>);

unsafe impl Send for ThreadRef {}
unsafe impl Sync for ThreadRef {}

impl ThreadRef {
    /// # Safety
    /// `ptr` must point at a live, properly initialized `Tcb` for as long as
    /// the returned handle is used.
    pub unsafe fn from_raw(ptr: NonNull<Tcb>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> NonNull<Tcb> {
        self.0
    }

    #[allow(clippy::should_implement_trait)]
    pub fn as_ref(&self) -> &Tcb {
        unsafe { self.0.as_ref() }
    }
}

impl core::ops::Deref for ThreadRef {
    type Target = Tcb;
    fn deref(&self) -> &Tcb {
        unsafe { self.0.as_ref() }
    }
}

impl core::fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ThreadRef({})", self.id())
    }
}

impl Tcb {
    /// Allocate a page from `pool` and initialize a `Tcb` at its base.
    ///
    /// The returned handle's `context` is left at `Default`; callers that
    /// need the thread to actually run somewhere must follow with
    /// [`Tcb::setup_initial_context`].
    pub fn create(pool: &PagePool, name: &str, priority: u8) -> Option<ThreadRef> {
        let page = pool.alloc_zeroed_page()?;
        let tcb_ptr = page.as_ptr().cast::<Tcb>();

        let mut name_buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        let tcb = Tcb {
            id: ThreadId::next(),
            name: name_buf,
            name_len: len as u8,
            status: AtomicU8::new(ThreadStatus::Blocked as u8),
            base_priority: AtomicU8::new(priority),
            effective_priority: AtomicU8::new(priority),
            wake_tick: AtomicU64::new(0),
            wait_on_lock: spin::Mutex::new(None),
            donors: spin::Mutex::new(Vec::new()),
            context: spin::Mutex::new(Default::default()),
            page,
            magic: THREAD_MAGIC,
        };

        unsafe {
            tcb_ptr.write(tcb);
            Some(ThreadRef::from_raw(NonNull::new_unchecked(tcb_ptr)))
        }
    }

    /// Address of the top of this thread's stack (the page's end, aligned
    /// down to 16 bytes as AArch64's AAPCS requires for `sp`).
    pub fn stack_top(&self) -> usize {
        let page_base = self.page.as_ptr() as usize;
        (page_base + crate::mem::PAGE_SIZE) & !0xf
    }

    /// Program the saved context so that, once switched to, execution begins
    /// at `entry` with `arg` in the architecture's first argument register.
    pub fn setup_initial_context(&self, entry: usize, arg: usize) {
        let mut ctx = self.context.lock();
        let stack_top = self.stack_top();

        #[cfg(target_arch = "aarch64")]
        {
            ctx.x = [0; 31];
            ctx.x[0] = arg as u64;
            ctx.sp = stack_top as u64;
            ctx.pc = entry as u64;
            ctx.pstate = 0x3c5;
            #[cfg(feature = "full-fpu")]
            {
                ctx.neon_state = [0; 32];
                ctx.fpcr = 0;
                ctx.fpsr = 0;
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            let _ = (entry, arg, stack_top, &mut *ctx);
        }
    }

    pub fn context_ptr(&self) -> *mut <DefaultArch as Arch>::SavedContext {
        let mut guard = self.context.lock();
        &mut *guard as *mut _
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("?")
    }

    pub fn status(&self) -> ThreadStatus {
        ThreadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ThreadStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn base_priority(&self) -> u8 {
        self.base_priority.load(Ordering::Acquire)
    }

    pub fn effective_priority(&self) -> u8 {
        self.effective_priority.load(Ordering::Acquire)
    }

    /// Set the base priority directly (only legal call site for
    /// `thread_set_priority`); recomputes the effective priority as
    /// `max(base, highest donor)`.
    pub fn set_base_priority(&self, priority: u8) {
        self.base_priority.store(priority, Ordering::Release);
        self.recompute_effective_priority();
    }

    /// Recompute `max(base, max donor effective)` and store it.
    pub fn recompute_effective_priority(&self) {
        let base = self.base_priority();
        let donors = self.donors.lock();
        let max_donor = donors.iter().map(|d| d.effective_priority()).max().unwrap_or(0);
        self.effective_priority.store(base.max(max_donor), Ordering::Release);
    }

    /// Verify the stack-overflow canary is still intact.
    pub fn check_stack_integrity(&self) -> bool {
        self.magic == THREAD_MAGIC
    }

    /// Pointer to the page backing this TCB, for freeing via `PagePool`.
    pub(crate) fn page_ptr(&self) -> NonNull<u8> {
        self.page
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;
    use crate::mem::PagePool;

    #[test]
    fn create_initializes_fields() {
        let pool = PagePool::new();
        let t = Tcb::create(&pool, "worker", PRI_DEFAULT).unwrap();
        assert_eq!(t.name(), "worker");
        assert_eq!(t.base_priority(), PRI_DEFAULT);
        assert_eq!(t.effective_priority(), PRI_DEFAULT);
        assert!(t.check_stack_integrity());
    }

    #[test]
    fn donation_raises_effective_priority_not_base() {
        let pool = PagePool::new();
        let low = Tcb::create(&pool, "low", 10).unwrap();
        let high = Tcb::create(&pool, "high", 31).unwrap();
        low.donors.lock().push(high);
        low.recompute_effective_priority();
        assert_eq!(low.base_priority(), 10);
        assert_eq!(low.effective_priority(), 31);
    }

    #[test]
    fn name_longer_than_buffer_is_truncated() {
        let pool = PagePool::new();
        let t = Tcb::create(&pool, "a-name-that-is-much-too-long-for-the-buffer", 0).unwrap();
        assert_eq!(t.name().len(), 15);
    }
}
