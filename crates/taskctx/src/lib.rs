//! taskctx - task-scoped context on a cooperative scheduler
//!
//! Context slots hold values that are private to each task yet readable from
//! anywhere the task executes. A single-threaded scheduler interleaves tasks
//! at explicit suspension points and swaps the active context frame on every
//! dispatch:
//! 1. **Slots**: declare a named, defaulted key once per process
//! 2. **Tasks**: spawn futures, optionally seeding their frame
//! 3. **Run**: drive every task to completion and collect per-task results
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use taskctx::prelude::*;
//!
//! let request_id = ContextSlot::declare("request_id", 42u64)?;
//! let mut scheduler = Scheduler::new();
//!
//! let handles: Vec<_> = (1..=3)
//!     .map(|id| {
//!         let slot = request_id.clone();
//!         scheduler.spawn_seeded(ContextFrame::new().with(&request_id, id), move |cx| async move {
//!             cx.sleep(id).await?;
//!             Ok(slot.get()?)
//!         })
//!     })
//!     .collect();
//!
//! for (task, result) in scheduler.run_all(&handles)? {
//!     println!("{task}: {:?}", result);
//! }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod scheduler;
pub mod slot;
pub mod state_machine;
pub mod types;

// Test harness
pub mod test_harness;

// Re-exports
pub use config::SchedulerConfig;
pub use error::*;
pub use frame::ContextFrame;
pub use scheduler::{
    current_task, sleep, suspend_current, yield_now, Scheduler, Signal, SpawnOptions, Suspend,
    SuspensionSchedule, TaskCx, TaskHandle, WakeCondition,
};
pub use slot::{lookup_slot, registered_slots, ContextSlot, SlotInfo};
pub use state_machine::TaskState;
pub use types::*;

/// Re-export test harness for external use
pub use test_harness::{run_simulator, SimulatorConfig, SimulatorReport, TestHarness};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a task-spawning caller normally needs
pub mod prelude {
    pub use crate::error::{ContextError, SchedulerError, TaskError, TaskResult};
    pub use crate::frame::ContextFrame;
    pub use crate::scheduler::{
        sleep, suspend_current, yield_now, Scheduler, Signal, SpawnOptions, TaskCx, TaskHandle,
        WakeCondition,
    };
    pub use crate::slot::ContextSlot;
    pub use crate::types::{TaskId, Tick};
}
