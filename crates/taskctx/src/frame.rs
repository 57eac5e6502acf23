//! Per-task context storage.
//!
//! A [`ContextFrame`] maps slot ids to values. Each task owns exactly one
//! frame for its whole life; the scheduler installs it as the active frame
//! while the task is being polled and takes it back afterwards. A frame built
//! outside the scheduler doubles as the seed passed to
//! [`Scheduler::spawn_seeded`](crate::Scheduler::spawn_seeded).

use crate::slot::ContextSlot;
use crate::types::SlotId;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Mapping from context slot to the value it holds for one task.
///
/// Slots without an entry resolve to their declared default.
#[derive(Default)]
pub struct ContextFrame {
    values: HashMap<SlotId, Box<dyn Any>>,
}

impl ContextFrame {
    /// Create an empty frame (every slot reads as its default)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set), used to assemble spawn seeds
    #[must_use]
    pub fn with<T: Clone + 'static>(mut self, slot: &ContextSlot<T>, value: T) -> Self {
        self.set(slot, value);
        self
    }

    /// Value of `slot` in this frame, or the slot's default
    #[must_use]
    pub fn get<T: Clone + 'static>(&self, slot: &ContextSlot<T>) -> T {
        self.values
            .get(&slot.id())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .unwrap_or_else(|| slot.default_value().clone())
    }

    /// Store `value` for `slot`
    pub fn set<T: Clone + 'static>(&mut self, slot: &ContextSlot<T>, value: T) {
        self.values.insert(slot.id(), Box::new(value));
    }

    /// Store `value` for `slot`, returning what the frame resolved to before
    pub fn replace<T: Clone + 'static>(&mut self, slot: &ContextSlot<T>, value: T) -> T {
        match self.values.insert(slot.id(), Box::new(value)) {
            Some(previous) => match previous.downcast::<T>() {
                Ok(previous) => *previous,
                Err(_) => slot.default_value().clone(),
            },
            None => slot.default_value().clone(),
        }
    }

    /// Drop the explicit value so the slot falls back to its default
    pub fn remove<T: Clone + 'static>(&mut self, slot: &ContextSlot<T>) -> bool {
        self.values.remove(&slot.id()).is_some()
    }

    /// Whether the frame holds an explicit value for `slot`
    #[inline]
    #[must_use]
    pub fn contains<T>(&self, slot: &ContextSlot<T>) -> bool {
        self.values.contains_key(&slot.id())
    }

    /// Number of slots with an explicit value
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no slot has an explicit value
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut slots: Vec<SlotId> = self.values.keys().copied().collect();
        slots.sort();
        f.debug_struct("ContextFrame").field("slots", &slots).finish()
    }
}
