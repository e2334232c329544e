//! Error handling for the threading core.
//!
//! Per the core's error model, there is exactly one recoverable failure mode:
//! running out of memory while creating a thread. Every other contract
//! violation (wrong interrupt level, blocking from a handler, recursive lock
//! acquire, releasing a lock you don't hold, a clobbered stack-overflow
//! canary) is a programming error and is fatal — it is caught with an
//! assertion, not propagated as a `Result`.

use core::fmt;

/// Result type for the one fallible operation in the public API.
pub type ThreadResult<T> = Result<T, SpawnError>;

/// Errors that can occur while creating a new thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The kernel has not called [`crate::kernel::init`] yet.
    NotInitialized,
    /// The page allocator could not provide a 4 KiB page for the new
    /// thread's control block and stack.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "threading core not initialized"),
            SpawnError::OutOfMemory => write!(f, "out of memory: no page available for new thread"),
        }
    }
}
