//! Virtual-time timer queue.
//!
//! Deadlines are plain tick counts. Entries with the same deadline expire in
//! registration order, so a fixed sequence of sleeps always produces the same
//! wake order.

use crate::types::{TaskId, Tick};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerEntry {
    pub(crate) deadline: Tick,
    pub(crate) seq: u64,
    pub(crate) task: TaskId,
    /// Dispatch epoch of the task when the timer was registered.
    pub(crate) epoch: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, deadline: Tick, task: TaskId, epoch: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimerEntry {
            deadline,
            seq,
            task,
            epoch,
        }));
    }

    pub(crate) fn peek(&self) -> Option<&TimerEntry> {
        self.heap.peek().map(|Reverse(entry)| entry)
    }

    pub(crate) fn pop(&mut self) -> Option<TimerEntry> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    /// Remove and return every entry due at or before `now`, earliest first.
    pub(crate) fn pop_due(&mut self, now: Tick) -> Vec<TimerEntry> {
        let mut due = Vec::new();
        while self.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
