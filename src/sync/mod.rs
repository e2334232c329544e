//! Synchronization primitives: counting semaphores, locks with priority
//! donation, and Mesa-style condition variables (§4.5–§4.8).
//!
//! Interrupt masking is the only mutual-exclusion primitive available to
//! these primitives themselves — there is exactly one CPU, so disabling
//! interrupts around a critical section is sufficient and nothing here
//! takes a second lock to protect its own bookkeeping.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::CondVar;
pub use lock::Lock;
pub use semaphore::Semaphore;
