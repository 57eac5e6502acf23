//! Suspension points.
//!
//! A task gives up control only by awaiting a [`Suspend`] future. On its
//! first poll the future records a wake request with the active task and
//! returns `Pending`; the scheduler turns that request into a timer, a signal
//! wait or a plain requeue. When the scheduler polls the task again the
//! future checks that its own condition holds and completes.

use super::active;
use crate::error::ContextError;
use crate::types::{SignalId, Tick};
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// When a suspended task becomes runnable again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeCondition {
    /// After the given number of virtual ticks; `After(0)` behaves like `Yield`
    After(Tick),
    /// Immediately, behind every task that is already runnable
    Yield,
    /// Once the signal has been raised
    Signal(Signal),
}

/// Wake request as recorded with the scheduler, in absolute time.
#[derive(Debug, Clone)]
pub(crate) enum Wake {
    At(Tick),
    Yield,
    Signal(Signal),
}

/// One-shot latch a task can wait on.
///
/// Raising is sticky: a task that waits on an already raised signal does not
/// suspend at all.
#[derive(Clone)]
pub struct Signal {
    id: SignalId,
    raised: Rc<Cell<bool>>,
}

impl Signal {
    /// Create a lowered signal
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SignalId::next(),
            raised: Rc::new(Cell::new(false)),
        }
    }

    /// Signal identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Raise the signal; waiting tasks become runnable on the next step
    pub fn raise(&self) {
        self.raised.set(true);
    }

    /// Whether the signal has been raised
    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.get()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Signal {}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id.0)
            .field("raised", &self.is_raised())
            .finish()
    }
}

enum SuspendState {
    Init(WakeCondition),
    Waiting(Wake),
    Done,
}

/// Future returned by [`suspend_current`].
#[must_use = "suspension happens only when the future is awaited"]
pub struct Suspend {
    state: SuspendState,
}

impl Suspend {
    fn satisfied(wake: &Wake, now: Tick) -> bool {
        match wake {
            Wake::At(deadline) => now >= *deadline,
            Wake::Yield => true,
            Wake::Signal(signal) => signal.is_raised(),
        }
    }
}

impl Future for Suspend {
    type Output = Result<(), ContextError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(now) = active::now() else {
            return Poll::Ready(Err(ContextError::no_active("suspend_current")));
        };

        let wake = match std::mem::replace(&mut self.state, SuspendState::Done) {
            SuspendState::Init(condition) => match condition {
                WakeCondition::After(0) | WakeCondition::Yield => Wake::Yield,
                WakeCondition::After(ticks) => Wake::At(now.saturating_add(ticks)),
                WakeCondition::Signal(signal) if signal.is_raised() => {
                    return Poll::Ready(Ok(()));
                }
                WakeCondition::Signal(signal) => Wake::Signal(signal),
            },
            SuspendState::Waiting(wake) => {
                if Self::satisfied(&wake, now) {
                    return Poll::Ready(Ok(()));
                }
                wake
            }
            SuspendState::Done => return Poll::Ready(Ok(())),
        };

        // Another future in the same task may have woken it early; re-register.
        active::request_wake(wake.clone());
        self.state = SuspendState::Waiting(wake);
        Poll::Pending
    }
}

/// Suspend the running task until `condition` holds.
///
/// The task's context frame is untouched while it is suspended and is active
/// again when the returned future completes. Awaiting it outside a task
/// yields `ContextError::NoActiveContext`.
pub fn suspend_current(condition: WakeCondition) -> Suspend {
    Suspend {
        state: SuspendState::Init(condition),
    }
}

/// Suspend for `ticks` units of virtual time
pub fn sleep(ticks: Tick) -> Suspend {
    suspend_current(WakeCondition::After(ticks))
}

/// Let every other runnable task run once before continuing
pub fn yield_now() -> Suspend {
    suspend_current(WakeCondition::Yield)
}
