//! Builder for thread creation parameters.

use super::{ThreadId, ThreadRef, PRI_DEFAULT};
use crate::errors::SpawnError;
use crate::mem::PagePool;

extern crate alloc;
use alloc::string::String;

/// Fluent builder over [`super::Tcb::create`]'s parameters.
///
/// Kept for callers configuring a name and a non-default priority who'd
/// rather not juggle a longer positional argument list than for
/// [`super::Tcb::create`] directly; `kernel::thread_create` takes the
/// already-resolved `(name, priority)` pair and calls `Tcb::create` itself
/// rather than going through this.
pub struct ThreadBuilder {
    priority: u8,
    name: Option<String>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self { priority: PRI_DEFAULT, name: None }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Allocate the thread's page and initialize its context to start at
    /// `entry(arg)`. Does not enqueue it anywhere; callers schedule it with
    /// `kernel::unblock` or push it onto the ready queue directly.
    pub fn build(
        self,
        pool: &PagePool,
        entry: fn(usize),
        arg: usize,
    ) -> Result<(ThreadRef, ThreadId), SpawnError> {
        let name = self.name.unwrap_or_default();
        let t = super::Tcb::create(pool, &name, self.priority).ok_or(SpawnError::OutOfMemory)?;
        t.setup_initial_context(entry as usize, arg);
        let id = t.id();
        Ok((t, id))
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
