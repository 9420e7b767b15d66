// dsr-core/src/scheduler.rs
//! Serialization of graph mutations.
//!
//! A pass covers one mutation, its resolution and the notification fan-out
//! that follows. While a pass is in flight any further mutation from the same
//! thread is rejected; work that needs to mutate goes through [`Scheduler::defer`]
//! and runs from [`Scheduler::next_task`] once the outermost pass is over.
//!
//! The scheduler lives inside the registry's reentrant transaction lock, so
//! only the thread holding that lock ever touches it.
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use dsr_common::error::{DsError, Result};
use tracing::trace;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Scheduler {
    in_pass: Cell<Option<&'static str>>,
    draining: Cell<bool>,
    queue: RefCell<VecDeque<Task>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            in_pass: Cell::new(None),
            draining: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn is_in_pass(&self) -> bool {
        self.in_pass.get().is_some()
    }

    pub(crate) fn begin_pass(&self, op: &'static str) -> Result<PassGuard<'_>> {
        if let Some(active) = self.in_pass.get() {
            return Err(DsError::Reentrant(format!(
                "'{op}' called while '{active}' is resolving or notifying; use schedule() instead"
            )));
        }
        self.in_pass.set(Some(op));
        Ok(PassGuard { scheduler: self })
    }

    pub(crate) fn defer(&self, task: Task) {
        let mut queue = self.queue.borrow_mut();
        queue.push_back(task);
        trace!("Deferred task queued ({} pending)", queue.len());
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns `None` if an outer frame on this thread is already draining.
    pub(crate) fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        if self.draining.replace(true) {
            return None;
        }
        Some(DrainGuard { scheduler: self })
    }

    pub(crate) fn next_task(&self) -> Option<Task> {
        self.queue.borrow_mut().pop_front()
    }
}

pub(crate) struct PassGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.in_pass.set(None);
    }
}

pub(crate) struct DrainGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.draining.set(false);
    }
}
