//! Cooperative task scheduler
//!
//! Runs a batch of independent tasks on the calling thread. Exactly one task
//! executes at a time and it only gives up control at a suspension point it
//! awaits itself ([`sleep`], [`yield_now`], [`suspend_current`]).
//!
//! Every dispatch is a single explicit frame swap:
//! 1. pop the next task from the ready queue
//! 2. move its [`ContextFrame`] into the active-task pointer
//! 3. poll the task once
//! 4. move the frame back out and act on the poll result
//!
//! Slots read and write through the active-task pointer only, so a task can
//! never observe another task's frame, and a frame cannot change while its
//! task is parked.
//!
//! Time is virtual: when nothing is runnable the clock jumps to the earliest
//! timer. Ready tasks run in FIFO order and timers with equal deadlines fire
//! in registration order, so a fixed spawn sequence and suspension schedule
//! always yields the same interleaving.

pub(crate) mod active;
mod cx;
mod schedule;
mod suspend;
mod timer;
mod waker;

pub use active::current_task;
pub use cx::TaskCx;
pub use schedule::SuspensionSchedule;
pub use suspend::{sleep, suspend_current, yield_now, Signal, Suspend, WakeCondition};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, TaskError, TaskResult};
use crate::frame::ContextFrame;
use crate::logging::{EventLog, TraceKind};
use crate::state_machine::{validate_transition, TaskState};
use crate::types::{SchedulerId, TaskId, Tick};
use active::Exit;
use futures::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use suspend::Wake;
use timer::TimerQueue;
use waker::WakeQueue;

/// Handle to a spawned task, valid only with the scheduler that issued it.
pub struct TaskHandle<T> {
    id: TaskId,
    scheduler: SchedulerId,
    _output: PhantomData<fn() -> T>,
}

impl<T> TaskHandle<T> {
    /// Task id
    #[inline]
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaskHandle<T> {}

impl<T> PartialEq for TaskHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.scheduler == other.scheduler
    }
}

impl<T> Eq for TaskHandle<T> {}

impl<T> std::hash::Hash for TaskHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.scheduler.hash(state);
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.id).finish()
    }
}

/// Spawn-time settings for a task.
#[derive(Debug, Default)]
pub struct SpawnOptions {
    label: Option<String>,
    seed: ContextFrame,
}

impl SpawnOptions {
    /// Options with no label and an empty seed frame
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in traces and to look up scripted pauses
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Initial frame; slots missing from it start at their default
    #[must_use]
    pub fn seed(mut self, seed: ContextFrame) -> Self {
        self.seed = seed;
        self
    }
}

struct TaskEntry<T> {
    label: Rc<str>,
    state: TaskState,
    future: Option<LocalBoxFuture<'static, anyhow::Result<T>>>,
    /// `None` while the frame is installed as the active frame, and after
    /// the task finished.
    frame: Option<ContextFrame>,
    outcome: Option<TaskResult<T>>,
    collected: bool,
    /// Bumped on every dispatch; wake registrations from older epochs are stale.
    epoch: u64,
    queued: bool,
    /// Parked on a foreign future's waker rather than a suspension point.
    external: bool,
}

struct SignalWaiter {
    signal: Signal,
    task: TaskId,
    epoch: u64,
}

/// Single-threaded cooperative scheduler producing `T` per task.
pub struct Scheduler<T = ()> {
    id: SchedulerId,
    config: SchedulerConfig,
    tasks: BTreeMap<TaskId, TaskEntry<T>>,
    ready: VecDeque<TaskId>,
    timers: TimerQueue,
    signal_waiters: Vec<SignalWaiter>,
    wake_queue: Arc<WakeQueue>,
    schedule: SuspensionSchedule,
    completion_order: Vec<TaskId>,
    next_task: u64,
    clock: Tick,
    steps: u64,
    trace: EventLog,
}

impl<T: 'static> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("tasks", &self.tasks.len())
            .field("ready", &self.ready.len())
            .field("timers", &self.timers.len())
            .field("clock", &self.clock)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Scheduler<T> {
    /// Create a scheduler with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with custom configuration
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            id: SchedulerId::next(),
            trace: EventLog::with_capacity(config.trace_capacity),
            config,
            tasks: BTreeMap::new(),
            ready: VecDeque::new(),
            timers: TimerQueue::default(),
            signal_waiters: Vec::new(),
            wake_queue: Arc::new(WakeQueue::default()),
            schedule: SuspensionSchedule::default(),
            completion_order: Vec::new(),
            next_task: 0,
            clock: 0,
            steps: 0,
        }
    }

    /// Script the durations [`TaskCx::pause`] hands out, per task label.
    /// Applies to tasks spawned afterwards.
    #[must_use]
    pub fn with_schedule(mut self, schedule: SuspensionSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Configuration this scheduler was built with
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current virtual time
    #[must_use]
    pub fn now(&self) -> Tick {
        self.clock
    }

    /// Dispatches performed so far
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Lifecycle trace of every task spawned here
    #[must_use]
    pub fn trace(&self) -> &EventLog {
        &self.trace
    }

    /// Ids of finished tasks, in the order they finished
    #[must_use]
    pub fn completion_order(&self) -> &[TaskId] {
        &self.completion_order
    }

    /// Number of tasks that have not finished yet
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.tasks.values().filter(|t| !t.state.is_terminal()).count()
    }

    /// Current state of a task
    ///
    /// # Errors
    /// - `SchedulerError::ForeignHandle` if the handle came from another scheduler
    pub fn state(&self, handle: &TaskHandle<T>) -> Result<TaskState, SchedulerError> {
        self.entry(handle).map(|entry| entry.state)
    }

    /// Spawn a task whose slots all start at their defaults
    pub fn spawn<F, Fut>(&mut self, entry: F) -> TaskHandle<T>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.spawn_with(SpawnOptions::new(), entry)
    }

    /// Spawn a task whose frame starts as `seed`
    pub fn spawn_seeded<F, Fut>(&mut self, seed: ContextFrame, entry: F) -> TaskHandle<T>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.spawn_with(SpawnOptions::new().seed(seed), entry)
    }

    /// Spawn a labelled task
    pub fn spawn_named<F, Fut>(&mut self, label: impl Into<String>, entry: F) -> TaskHandle<T>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.spawn_with(SpawnOptions::new().label(label), entry)
    }

    /// Register a task in `Created` and queue it.
    ///
    /// Returns immediately; `entry` is not called until the task is first
    /// dispatched.
    pub fn spawn_with<F, Fut>(&mut self, options: SpawnOptions, entry: F) -> TaskHandle<T>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.next_task += 1;
        let id = TaskId(self.next_task);
        let label: Rc<str> = options.label.unwrap_or_else(|| id.to_string()).into();
        let cx = TaskCx::new(id, Rc::clone(&label), self.schedule.pauses_for(&label));
        let future = async move { entry(cx).await }.boxed_local();

        self.trace.append(
            self.steps,
            self.clock,
            id,
            TraceKind::Spawned {
                label: label.to_string(),
            },
        );
        tracing::debug!(task = %id, label = %label, seeded = options.seed.len(), "spawned task");

        self.tasks.insert(
            id,
            TaskEntry {
                label,
                state: TaskState::Created,
                future: Some(future),
                frame: Some(options.seed),
                outcome: None,
                collected: false,
                epoch: 0,
                queued: true,
                external: false,
            },
        );
        self.ready.push_back(id);

        TaskHandle {
            id,
            scheduler: self.id,
            _output: PhantomData,
        }
    }

    /// Cancel a task that has not finished.
    ///
    /// Returns `false` if the task had already finished.
    ///
    /// # Errors
    /// - `SchedulerError::ForeignHandle` if the handle came from another scheduler
    pub fn cancel(&mut self, handle: &TaskHandle<T>) -> Result<bool, SchedulerError> {
        self.entry(handle)?;
        Ok(self.cancel_task(handle.id))
    }

    /// Drive the loop until every task in `handles` has finished.
    ///
    /// The map holds one result per distinct handle, in completion order.
    /// Tasks outside `handles` run as well whenever they are runnable.
    ///
    /// # Errors
    /// - `SchedulerError::ForeignHandle` / `AlreadyCollected` for bad handles
    /// - `SchedulerError::StepLimitExceeded` if `max_steps` runs out
    pub fn run_all(
        &mut self,
        handles: &[TaskHandle<T>],
    ) -> Result<IndexMap<TaskId, TaskResult<T>>, SchedulerError> {
        for handle in handles {
            if self.entry(handle)?.collected {
                return Err(SchedulerError::AlreadyCollected { task: handle.id });
            }
        }
        let wanted: HashSet<TaskId> = handles.iter().map(TaskHandle::id).collect();

        while !wanted.iter().all(|id| self.is_finished(*id)) {
            if !self.step()? {
                break;
            }
        }

        let mut results = IndexMap::with_capacity(wanted.len());
        for id in self.completion_order.iter().filter(|id| wanted.contains(*id)) {
            if let Some(entry) = self.tasks.get_mut(id) {
                if let Some(outcome) = entry.outcome.take() {
                    entry.collected = true;
                    results.insert(*id, outcome);
                }
            }
        }

        tracing::debug!(
            tasks = results.len(),
            steps = self.steps,
            tick = self.clock,
            "run finished"
        );
        Ok(results)
    }

    /// Spawn `entry`, run it to completion and return its result
    ///
    /// # Errors
    /// - `SchedulerError::StepLimitExceeded` if `max_steps` runs out
    pub fn run_task<F, Fut>(&mut self, entry: F) -> Result<TaskResult<T>, SchedulerError>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let handle = self.spawn(entry);
        let mut results = self.run_all(&[handle])?;
        results
            .shift_remove(&handle.id)
            .ok_or(SchedulerError::UnknownTask { task: handle.id })
    }

    /// Run until no task can make progress; returns the dispatches performed
    ///
    /// # Errors
    /// - `SchedulerError::StepLimitExceeded` if `max_steps` runs out
    pub fn run_until_idle(&mut self) -> Result<u64, SchedulerError> {
        let start = self.steps;
        while self.step()? {}
        Ok(self.steps - start)
    }

    /// Take the result of a finished task not yet collected by `run_all`
    ///
    /// # Errors
    /// - `SchedulerError::ForeignHandle` if the handle came from another scheduler
    /// - `SchedulerError::AlreadyCollected` if the result was already taken
    pub fn take_outcome(
        &mut self,
        handle: &TaskHandle<T>,
    ) -> Result<Option<TaskResult<T>>, SchedulerError> {
        if self.entry(handle)?.collected {
            return Err(SchedulerError::AlreadyCollected { task: handle.id });
        }
        let Some(entry) = self.tasks.get_mut(&handle.id) else {
            return Err(SchedulerError::UnknownTask { task: handle.id });
        };
        let outcome = entry.outcome.take();
        if outcome.is_some() {
            entry.collected = true;
        }
        Ok(outcome)
    }

    fn entry(&self, handle: &TaskHandle<T>) -> Result<&TaskEntry<T>, SchedulerError> {
        if handle.scheduler != self.id {
            return Err(SchedulerError::ForeignHandle { task: handle.id });
        }
        self.tasks
            .get(&handle.id)
            .ok_or(SchedulerError::UnknownTask { task: handle.id })
    }

    fn is_finished(&self, id: TaskId) -> bool {
        self.tasks.get(&id).map_or(true, |t| t.state.is_terminal())
    }

    /// One iteration of the loop. Returns `false` once nothing can progress.
    fn step(&mut self) -> Result<bool, SchedulerError> {
        if let Some(max) = self.config.max_steps {
            if self.steps >= max {
                return Err(SchedulerError::StepLimitExceeded { steps: max });
            }
        }

        self.collect_wakeups();

        if let Some(id) = self.ready.pop_front() {
            self.dispatch(id);
            return Ok(true);
        }
        if let Some(deadline) = self.next_live_deadline() {
            self.advance_clock(deadline);
            return Ok(true);
        }
        if self
            .tasks
            .values()
            .any(|t| t.external && t.state == TaskState::Suspended)
            && self.wake_queue.wait()
        {
            return Ok(true);
        }
        Ok(self.fail_stalled())
    }

    fn collect_wakeups(&mut self) {
        for entry in self.timers.pop_due(self.clock) {
            self.wake(entry.task, entry.epoch);
        }

        let waiters = std::mem::take(&mut self.signal_waiters);
        let mut pending = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            if !self.is_waiting(waiter.task, waiter.epoch) {
                continue;
            }
            if waiter.signal.is_raised() {
                self.wake(waiter.task, waiter.epoch);
            } else {
                pending.push(waiter);
            }
        }
        self.signal_waiters = pending;

        for (task, epoch) in self.wake_queue.drain() {
            self.wake(task, epoch);
        }
    }

    fn is_waiting(&self, task: TaskId, epoch: u64) -> bool {
        self.tasks.get(&task).is_some_and(|t| {
            t.state == TaskState::Suspended && t.epoch == epoch && !t.queued
        })
    }

    fn wake(&mut self, task: TaskId, epoch: u64) {
        if !self.is_waiting(task, epoch) {
            return;
        }
        if let Some(entry) = self.tasks.get_mut(&task) {
            entry.queued = true;
            entry.external = false;
            self.ready.push_back(task);
        }
    }

    /// Earliest deadline that still belongs to a parked task; stale timers
    /// are discarded on the way.
    fn next_live_deadline(&mut self) -> Option<Tick> {
        while let Some(entry) = self.timers.peek().copied() {
            if self.is_waiting(entry.task, entry.epoch) {
                return Some(entry.deadline);
            }
            self.timers.pop();
        }
        None
    }

    fn advance_clock(&mut self, deadline: Tick) {
        if deadline <= self.clock {
            return;
        }
        if self.config.tick_duration_ms > 0 {
            let ticks = deadline - self.clock;
            std::thread::sleep(Duration::from_millis(
                self.config.tick_duration_ms.saturating_mul(ticks),
            ));
        }
        tracing::trace!(from = self.clock, to = deadline, "advancing virtual clock");
        self.clock = deadline;
    }

    /// Fail every task still waiting on a signal or a foreign future. Only
    /// called when no task is runnable, no timer is pending and every foreign
    /// waker has been dropped, so none of them can be woken again.
    fn fail_stalled(&mut self) -> bool {
        let waiters = std::mem::take(&mut self.signal_waiters);
        let mut stalled: Vec<TaskId> = waiters
            .into_iter()
            .filter(|w| self.is_waiting(w.task, w.epoch))
            .map(|w| w.task)
            .collect();
        stalled.extend(
            self.tasks
                .iter()
                .filter(|(_, t)| t.external && t.state == TaskState::Suspended && !t.queued)
                .map(|(id, _)| *id),
        );
        stalled.sort_unstable();
        stalled.dedup();

        if !stalled.is_empty() {
            tracing::warn!(tasks = stalled.len(), "no task can make progress");
        }
        for id in &stalled {
            self.finish(*id, Err(TaskError::Stalled));
        }
        !stalled.is_empty()
    }

    fn dispatch(&mut self, id: TaskId) {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return;
        };
        entry.queued = false;
        if entry.state.is_terminal() {
            return;
        }
        if entry.future.is_none() || entry.frame.is_none() {
            tracing::error!(task = %id, "runnable task has no future or frame");
            self.finish(
                id,
                Err(TaskError::Failed(anyhow::anyhow!(
                    "task {id} lost its future or frame"
                ))),
            );
            return;
        }
        let (Some(mut future), Some(frame)) = (entry.future.take(), entry.frame.take()) else {
            return;
        };
        entry.epoch += 1;
        let epoch = entry.epoch;

        self.steps += 1;
        self.set_state(id, TaskState::Running);
        self.trace
            .append(self.steps, self.clock, id, TraceKind::Dispatched);
        tracing::trace!(task = %id, tick = self.clock, "dispatching task");

        let waker = self.wake_queue.waker(id, epoch);
        let mut cx = Context::from_waker(&waker);

        let guard = active::enter(id, self.clock, frame);
        let poll = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
        let Exit {
            frame,
            wakes,
            cancels,
        } = guard.exit().unwrap_or_else(|| {
            tracing::error!(task = %id, "active frame lost during poll");
            Exit {
                frame: ContextFrame::new(),
                wakes: Vec::new(),
                cancels: Vec::new(),
            }
        });

        match poll {
            Ok(Poll::Ready(Ok(value))) => self.finish(id, Ok(value)),
            Ok(Poll::Ready(Err(err))) => self.finish(id, Err(TaskError::Failed(err))),
            Ok(Poll::Pending) => self.park(id, epoch, future, frame, wakes),
            Err(payload) => {
                self.finish(id, Err(TaskError::Panicked(panic_message(payload.as_ref()))));
            }
        }

        for target in cancels {
            self.cancel_task(target);
        }
    }

    fn park(
        &mut self,
        id: TaskId,
        epoch: u64,
        future: LocalBoxFuture<'static, anyhow::Result<T>>,
        frame: ContextFrame,
        wakes: Vec<Wake>,
    ) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.future = Some(future);
            entry.frame = Some(frame);
            entry.external = wakes.is_empty();
        }
        self.set_state(id, TaskState::Suspended);
        self.trace.append(
            self.steps,
            self.clock,
            id,
            TraceKind::Suspended { wakes: wakes.len() },
        );
        tracing::trace!(task = %id, wakes = wakes.len(), "task suspended");

        for wake in wakes {
            match wake {
                Wake::Yield => self.wake(id, epoch),
                Wake::At(deadline) if deadline <= self.clock => self.wake(id, epoch),
                Wake::At(deadline) => self.timers.insert(deadline, id, epoch),
                Wake::Signal(signal) if signal.is_raised() => self.wake(id, epoch),
                Wake::Signal(signal) => self.signal_waiters.push(SignalWaiter {
                    signal,
                    task: id,
                    epoch,
                }),
            }
        }
    }

    /// Record a terminal result and discard the task's future and frame.
    ///
    /// A future that never completed is dropped with its own frame active, so
    /// destructors inside the task still see the task's slot values.
    fn finish(&mut self, id: TaskId, result: TaskResult<T>) {
        let (state, kind) = match &result {
            Ok(_) => (TaskState::Completed, TraceKind::Completed),
            Err(TaskError::Cancelled) => (TaskState::Failed, TraceKind::Cancelled),
            Err(TaskError::Stalled) => (TaskState::Failed, TraceKind::Stalled),
            Err(err) => (
                TaskState::Failed,
                TraceKind::Failed {
                    reason: err.to_string(),
                },
            ),
        };

        match &result {
            Ok(_) => tracing::debug!(task = %id, tick = self.clock, "task completed"),
            Err(err) => tracing::warn!(task = %id, tick = self.clock, error = %err, "task failed"),
        }

        self.set_state(id, state);
        self.trace.append(self.steps, self.clock, id, kind);
        if let Some(entry) = self.tasks.get_mut(&id) {
            if let (Some(future), Some(frame)) = (entry.future.take(), entry.frame.take()) {
                let guard = active::enter(id, self.clock, frame);
                let dropped = panic::catch_unwind(AssertUnwindSafe(move || drop(future)));
                // Wakes and cancels requested by destructors are ignored.
                let _ = guard.exit();
                if dropped.is_err() {
                    tracing::warn!(task = %id, "task future panicked while being dropped");
                }
            }
            entry.queued = false;
            entry.external = false;
            entry.outcome = Some(result);
        }
        self.completion_order.push(id);
    }

    fn cancel_task(&mut self, id: TaskId) -> bool {
        let Some(state) = self.tasks.get(&id).map(|t| t.state) else {
            return false;
        };
        match state {
            TaskState::Created | TaskState::Suspended => {
                let label = self.tasks.get(&id).map(|t| Rc::clone(&t.label));
                tracing::debug!(task = %id, label = ?label, "cancelling task");
                self.finish(id, Err(TaskError::Cancelled));
                true
            }
            TaskState::Running | TaskState::Completed | TaskState::Failed => false,
        }
    }

    fn set_state(&mut self, id: TaskId, to: TaskState) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            if let Err(err) = validate_transition(entry.state, to) {
                tracing::error!(task = %id, error = %err, "scheduler performed an illegal transition");
            }
            entry.state = to;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
