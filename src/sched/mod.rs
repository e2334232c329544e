//! Strict-priority scheduling queues.
//!
//! A uniprocessor scheduler needs exactly three ordered collections (§4.3):
//! the ready queue (who runs next), the sleep queue (who to wake on a timer
//! tick), and the destruction queue (whose page to free once it's safe to
//! do so). All three are intrusive, singly-linked-by-handle lists over
//! [`crate::thread::ThreadRef`] — no allocation on the scheduling hot path.

pub mod destruction;
pub mod ready;
pub mod sleep;

pub use destruction::DestructionQueue;
pub use ready::ReadyQueue;
pub use sleep::SleepQueue;
