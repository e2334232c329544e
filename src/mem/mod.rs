//! Page allocation for thread control blocks and their stacks.
//!
//! Each thread's [`crate::thread::Tcb`] and kernel stack share a single 4 KiB
//! page (§3, §6): the TCB sits at the base, the stack grows downward from
//! the top. The page allocator is the kernel's only collaborator for thread
//! memory; it is never called from inside a context switch (`free_page` runs
//! only from `do_schedule`, before the switch, draining the destruction
//! queue).

pub mod page_pool;

pub use page_pool::{PagePool, PAGE_SIZE};
