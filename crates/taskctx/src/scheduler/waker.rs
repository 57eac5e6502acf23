//! Wakers for futures that do not go through a suspension point.
//!
//! A task may await a future from outside this crate (a channel, a timer on
//! another thread). Such a future returns `Pending` without leaving a wake
//! request, so the scheduler parks the task until the future's waker fires.
//! Wakers may fire from any thread; they push into a shared queue that the
//! scheduler drains between dispatches. Live wakers are counted so the
//! scheduler can tell when no foreign future is able to wake a task anymore.

use crate::types::TaskId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

#[derive(Debug, Default)]
pub(crate) struct WakeQueue {
    queue: Mutex<VecDeque<(TaskId, u64)>>,
    /// Wakers created and not yet dropped; only changed under `queue`'s lock.
    live: AtomicUsize,
    ready: Condvar,
}

impl WakeQueue {
    pub(crate) fn waker(self: &Arc<Self>, task: TaskId, epoch: u64) -> Waker {
        {
            let _queue = self.queue.lock();
            self.live.fetch_add(1, Ordering::SeqCst);
        }
        Waker::from(Arc::new(TaskWaker {
            task,
            epoch,
            queue: Arc::clone(self),
        }))
    }

    fn push(&self, task: TaskId, epoch: u64) {
        self.queue.lock().push_back((task, epoch));
        self.ready.notify_one();
    }

    pub(crate) fn drain(&self) -> Vec<(TaskId, u64)> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of wakers that can still fire.
    pub(crate) fn live_wakers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Block the scheduler thread until a waker fires.
    ///
    /// Returns `false` without blocking further once every outstanding waker
    /// has been dropped and the queue is empty.
    pub(crate) fn wait(&self) -> bool {
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            if self.live.load(Ordering::SeqCst) == 0 {
                return false;
            }
            self.ready.wait(&mut queue);
        }
        true
    }

    fn release(&self) {
        let _queue = self.queue.lock();
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.ready.notify_one();
    }
}

struct TaskWaker {
    task: TaskId,
    epoch: u64,
    queue: Arc<WakeQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.queue.push(self.task, self.epoch);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.task, self.epoch);
    }
}

impl Drop for TaskWaker {
    fn drop(&mut self) {
        self.queue.release();
    }
}
