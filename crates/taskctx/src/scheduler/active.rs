//! The active-task pointer.
//!
//! While the scheduler polls a task it moves the task's frame into this
//! thread-local record; slot reads and writes resolve through it, and
//! suspension points leave their wake requests in it. When the poll returns
//! the scheduler takes the frame and the requests back out. Exactly one task
//! is active per thread at a time; a nested scheduler run restores the outer
//! task on exit.

use super::suspend::Wake;
use crate::frame::ContextFrame;
use crate::types::{TaskId, Tick};
use std::cell::RefCell;

struct ActiveTask {
    id: TaskId,
    now: Tick,
    frame: ContextFrame,
    wakes: Vec<Wake>,
    cancels: Vec<TaskId>,
}

thread_local! {
    static ACTIVE: RefCell<Option<ActiveTask>> = const { RefCell::new(None) };
}

/// What a task left behind when its poll returned.
pub(crate) struct Exit {
    pub(crate) frame: ContextFrame,
    pub(crate) wakes: Vec<Wake>,
    pub(crate) cancels: Vec<TaskId>,
}

/// Restores the previously active task when dropped.
pub(crate) struct ActiveGuard {
    prev: Option<ActiveTask>,
    exited: bool,
}

/// Make `frame` the active frame for task `id`.
pub(crate) fn enter(id: TaskId, now: Tick, frame: ContextFrame) -> ActiveGuard {
    let prev = ACTIVE.with(|slot| {
        slot.replace(Some(ActiveTask {
            id,
            now,
            frame,
            wakes: Vec::new(),
            cancels: Vec::new(),
        }))
    });
    ActiveGuard {
        prev,
        exited: false,
    }
}

impl ActiveGuard {
    /// Clear the active task and hand its frame back to the scheduler.
    pub(crate) fn exit(mut self) -> Option<Exit> {
        let prev = self.prev.take();
        self.exited = true;
        ACTIVE
            .with(|slot| slot.replace(prev))
            .map(|task| Exit {
                frame: task.frame,
                wakes: task.wakes,
                cancels: task.cancels,
            })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        let prev = self.prev.take();
        let _ = ACTIVE.try_with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

pub(crate) fn with_frame<R>(f: impl FnOnce(&ContextFrame) -> R) -> Option<R> {
    ACTIVE.with(|slot| slot.borrow().as_ref().map(|task| f(&task.frame)))
}

pub(crate) fn with_frame_mut<R>(f: impl FnOnce(&mut ContextFrame) -> R) -> Option<R> {
    ACTIVE.with(|slot| slot.borrow_mut().as_mut().map(|task| f(&mut task.frame)))
}

/// Id of the task currently being polled on this thread
#[must_use]
pub fn current_task() -> Option<TaskId> {
    ACTIVE.with(|slot| slot.borrow().as_ref().map(|task| task.id))
}

/// Scheduler clock as seen by the active task.
pub(crate) fn now() -> Option<Tick> {
    ACTIVE.with(|slot| slot.borrow().as_ref().map(|task| task.now))
}

pub(crate) fn request_wake(wake: Wake) -> bool {
    ACTIVE.with(|slot| match slot.borrow_mut().as_mut() {
        Some(task) => {
            task.wakes.push(wake);
            true
        }
        None => false,
    })
}

pub(crate) fn request_cancel(target: TaskId) -> bool {
    ACTIVE.with(|slot| match slot.borrow_mut().as_mut() {
        Some(task) => {
            task.cancels.push(target);
            true
        }
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_exit_round_trip() {
        assert!(current_task().is_none());

        let guard = enter(TaskId(1), 3, ContextFrame::new());
        assert_eq!(current_task(), Some(TaskId(1)));
        assert_eq!(now(), Some(3));
        assert!(request_cancel(TaskId(2)));

        let exit = guard.exit().unwrap();
        assert_eq!(exit.cancels, vec![TaskId(2)]);
        assert!(current_task().is_none());
    }

    #[test]
    fn nested_enter_restores_outer() {
        let outer = enter(TaskId(1), 0, ContextFrame::new());
        {
            let inner = enter(TaskId(2), 0, ContextFrame::new());
            assert_eq!(current_task(), Some(TaskId(2)));
            inner.exit();
        }
        assert_eq!(current_task(), Some(TaskId(1)));
        outer.exit();
        assert!(current_task().is_none());
    }

    #[test]
    fn dropped_guard_restores_previous() {
        let guard = enter(TaskId(9), 0, ContextFrame::new());
        drop(guard);
        assert!(current_task().is_none());
        assert!(!request_wake(Wake::Yield));
    }
}
