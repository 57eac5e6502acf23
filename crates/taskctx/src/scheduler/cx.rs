//! Handle passed to every task entry point.

use super::active;
use super::suspend::{sleep, suspend_current, yield_now, Signal, Suspend, WakeCondition};
use crate::error::ContextError;
use crate::slot::ContextSlot;
use crate::types::{TaskId, Tick};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Task-side view of the scheduler.
///
/// Everything here is also reachable without the handle (`slot.get()`,
/// [`sleep`], [`yield_now`]); the handle adds the task's identity and its
/// scripted pauses.
#[derive(Clone)]
pub struct TaskCx {
    id: TaskId,
    label: Rc<str>,
    pauses: Rc<RefCell<VecDeque<Tick>>>,
}

impl TaskCx {
    pub(crate) fn new(id: TaskId, label: Rc<str>, pauses: VecDeque<Tick>) -> Self {
        Self {
            id,
            label,
            pauses: Rc::new(RefCell::new(pauses)),
        }
    }

    /// This task's id
    #[inline]
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Label given at spawn time (defaults to the id, e.g. `task-3`)
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current virtual time
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn now(&self) -> Result<Tick, ContextError> {
        active::now().ok_or_else(|| ContextError::no_active("TaskCx::now"))
    }

    /// Shorthand for [`ContextSlot::get`]
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn get<T: Clone + 'static>(&self, slot: &ContextSlot<T>) -> Result<T, ContextError> {
        slot.get()
    }

    /// Shorthand for [`ContextSlot::set`]
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn set<T: Clone + 'static>(&self, slot: &ContextSlot<T>, value: T) -> Result<(), ContextError> {
        slot.set(value)
    }

    /// Suspend until `condition` holds
    pub fn suspend(&self, condition: WakeCondition) -> Suspend {
        suspend_current(condition)
    }

    /// Suspend for `ticks` of virtual time
    pub fn sleep(&self, ticks: Tick) -> Suspend {
        sleep(ticks)
    }

    /// Let the other runnable tasks go first
    pub fn yield_now(&self) -> Suspend {
        yield_now()
    }

    /// Suspend until `signal` is raised
    pub fn wait(&self, signal: &Signal) -> Suspend {
        suspend_current(WakeCondition::Signal(signal.clone()))
    }

    /// Raise `signal`, releasing every task waiting on it
    pub fn notify(&self, signal: &Signal) {
        signal.raise();
    }

    /// Suspend for the next duration scripted for this task's label, or
    /// just yield once the script is exhausted
    pub fn pause(&self) -> Suspend {
        match self.pauses.borrow_mut().pop_front() {
            Some(ticks) => sleep(ticks),
            None => yield_now(),
        }
    }

    /// Scripted pauses not yet consumed
    #[must_use]
    pub fn remaining_pauses(&self) -> usize {
        self.pauses.borrow().len()
    }

    /// Cancel another task (or this one) once the current poll returns.
    ///
    /// A target that is created or suspended fails with
    /// `TaskError::Cancelled`; cancelling the calling task takes effect at
    /// its next suspension point.
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn cancel(&self, target: TaskId) -> Result<(), ContextError> {
        if active::request_cancel(target) {
            Ok(())
        } else {
            Err(ContextError::no_active("TaskCx::cancel"))
        }
    }
}

impl fmt::Debug for TaskCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCx")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
