//! Context slots
//!
//! A [`ContextSlot`] is a typed, named key with a default value. Declaring a
//! slot registers its name in a process-wide, append-only registry; reads and
//! writes resolve against the frame of whichever task the scheduler is
//! currently polling.
//!
//! ```rust,ignore
//! static REQUEST_ID: Lazy<ContextSlot<u64>> =
//!     Lazy::new(|| ContextSlot::declare("request_id", 42).expect("declared once"));
//!
//! scheduler.spawn(|_cx| async move {
//!     REQUEST_ID.set(7)?;
//!     sleep(1).await?;
//!     assert_eq!(REQUEST_ID.get()?, 7);
//!     Ok(())
//! });
//! ```

use crate::error::ContextError;
use crate::scheduler::active;
use crate::types::SlotId;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Registry entry describing a declared slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    /// Process-unique slot id
    pub id: SlotId,
    /// Name given at declaration
    pub name: String,
    /// Rust type of the slot's values
    pub type_name: &'static str,
}

static REGISTRY: Lazy<RwLock<IndexMap<String, SlotInfo>>> =
    Lazy::new(|| RwLock::new(IndexMap::new()));

/// All slots declared so far, in declaration order
#[must_use]
pub fn registered_slots() -> Vec<SlotInfo> {
    REGISTRY.read().values().cloned().collect()
}

/// Look up a declared slot by name
#[must_use]
pub fn lookup_slot(name: &str) -> Option<SlotInfo> {
    REGISTRY.read().get(name).cloned()
}

struct SlotInner<T> {
    id: SlotId,
    name: String,
    default: T,
}

/// Typed, named, defaulted key into per-task context storage.
///
/// Cloning a slot yields another handle to the same declaration.
pub struct ContextSlot<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T> Clone for ContextSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ContextSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSlot")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<T> ContextSlot<T> {
    /// Registry id of this slot
    #[inline]
    #[must_use]
    pub fn id(&self) -> SlotId {
        self.inner.id
    }

    /// Declared name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Value read by tasks that never wrote this slot
    #[inline]
    #[must_use]
    pub fn default_value(&self) -> &T {
        &self.inner.default
    }

    fn no_active(&self) -> ContextError {
        ContextError::no_active(format!("context slot `{}`", self.inner.name))
    }
}

impl<T: Clone + 'static> ContextSlot<T> {
    /// Declare a new slot
    ///
    /// # Errors
    /// - `ContextError::DuplicateSlot` if `name` was declared before in this process
    pub fn declare(name: impl Into<String>, default: T) -> Result<Self, ContextError> {
        let name = name.into();
        let id = {
            let mut registry = REGISTRY.write();
            if registry.contains_key(&name) {
                return Err(ContextError::DuplicateSlot { name });
            }
            let id = SlotId::next();
            registry.insert(
                name.clone(),
                SlotInfo {
                    id,
                    name: name.clone(),
                    type_name: std::any::type_name::<T>(),
                },
            );
            id
        };

        tracing::debug!(slot = %name, %id, "declared context slot");

        Ok(Self {
            inner: Arc::new(SlotInner { id, name, default }),
        })
    }

    /// Current task's value, or the default if the task never wrote it
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn get(&self) -> Result<T, ContextError> {
        active::with_frame(|frame| frame.get(self)).ok_or_else(|| self.no_active())
    }

    /// Overwrite the value in the current task's frame
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn set(&self, value: T) -> Result<(), ContextError> {
        active::with_frame_mut(|frame| frame.set(self, value)).ok_or_else(|| self.no_active())
    }

    /// Overwrite the value and return the previous one
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn replace(&self, value: T) -> Result<T, ContextError> {
        active::with_frame_mut(|frame| frame.replace(self, value)).ok_or_else(|| self.no_active())
    }

    /// Read-modify-write; `f` runs without the frame borrowed, so it may touch
    /// other slots
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn update(&self, f: impl FnOnce(T) -> T) -> Result<T, ContextError> {
        let next = f(self.get()?);
        self.set(next.clone())?;
        Ok(next)
    }

    /// Whether the current task holds an explicit value for this slot
    ///
    /// # Errors
    /// - `ContextError::NoActiveContext` when called outside a running task
    pub fn is_set(&self) -> Result<bool, ContextError> {
        active::with_frame(|frame| frame.contains(self)).ok_or_else(|| self.no_active())
    }
}
