//! Testing utilities for the taskctx workspace
//!
//! Shared test helpers and fixtures.

#![allow(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use taskctx::ContextSlot;

/// Slot names are process-wide, and tests in one binary share the process.
pub fn unique_slot_name(prefix: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("{prefix}.{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

pub fn declare_slot<T: Clone + 'static>(prefix: &str, default: T) -> ContextSlot<T> {
    ContextSlot::declare(unique_slot_name(prefix), default).unwrap()
}

/// Append-only log that tasks can push observations into.
#[derive(Debug)]
pub struct Recorder<V> {
    entries: Rc<RefCell<Vec<V>>>,
}

impl<V> Clone for Recorder<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Rc::clone(&self.entries),
        }
    }
}

impl<V> Default for Recorder<V> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<V: Clone> Recorder<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, value: V) {
        self.entries.borrow_mut().push(value);
    }

    pub fn entries(&self) -> Vec<V> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

pub fn init_test_tracing() {
    taskctx::logging::init_tracing("warn");
}
