//! Context simulator - randomized interleaving checks for the scheduler
//!
//! Generates a seeded batch of tasks, each with its own plan of slot writes,
//! reads, suspensions and nested calls, and runs them on one scheduler. Every
//! task keeps a private model of what its slots should hold and compares each
//! read against it. Values are tagged with the writing task, so any leak
//! between frames shows up as a mismatch.

use crate::config::SchedulerConfig;
use crate::error::{ContextError, TaskError};
use crate::frame::ContextFrame;
use crate::scheduler::{Scheduler, SpawnOptions, SuspensionSchedule, TaskCx};
use crate::slot::ContextSlot;
use crate::types::{TaskId, Tick};
use futures::future::{FutureExt, LocalBoxFuture};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Tasks spawned per run
    pub tasks: usize,
    /// Context slots shared by all tasks
    pub slots: usize,
    /// Upper bound on top-level operations per task
    pub ops_per_task: usize,
    /// Maximum nesting of calls inside a task
    pub max_depth: usize,
    /// Longest single sleep, in ticks
    pub max_delay: Tick,
    /// Probability that a task is planned to fail after its last operation
    pub fail_rate: f64,
    /// Abandon remaining task work after the first violation
    pub stop_on_first_violation: bool,
    /// Settings for the scheduler the tasks run on
    pub scheduler: SchedulerConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tasks: 50,
            slots: 4,
            ops_per_task: 12,
            max_depth: 3,
            max_delay: 5,
            fail_rate: 0.1,
            stop_on_first_violation: false,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// A violation detected during simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    /// A read returned something other than the task's last write (or the default)
    ValueMismatch {
        task: TaskId,
        slot: usize,
        expected: u64,
        actual: u64,
    },
    /// A task planned to succeed ended with an error
    UnexpectedFailure { task: TaskId, error: String },
    /// A task planned to fail completed
    UnexpectedSuccess { task: TaskId },
    /// `run_all` returned no result for a spawned task
    MissingResult { task: TaskId },
    /// The trace hash chain did not verify
    BrokenTrace { index: usize },
    /// Two runs of the same seed interleaved differently
    ReplayDivergence {
        seed: u64,
        first: String,
        second: String,
    },
}

/// Statistics collected during simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub tasks: usize,
    pub completed: usize,
    /// Failed tasks, planned or not
    pub failed: usize,
    pub planned_failures: usize,
    /// Slot reads checked against the model
    pub reads: u64,
    pub writes: u64,
    /// `Suspended` events in the trace
    pub suspensions: u64,
    /// Scheduler dispatches
    pub steps: u64,
    /// Virtual time when the run ended
    pub final_tick: Tick,
    /// Events recorded in the trace
    pub trace_events: usize,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub violations: Vec<Violation>,
    /// Task ids in the order they finished
    pub completion_order: Vec<TaskId>,
    /// Trace fingerprint; equal for equal interleavings
    pub fingerprint: String,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Context Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Tasks: {}", self.stats.tasks);
        let _ = writeln!(report, "Completed: {}", self.stats.completed);
        let _ = writeln!(
            report,
            "Failed: {} ({} planned)",
            self.stats.failed, self.stats.planned_failures
        );
        let _ = writeln!(report, "Reads: {}", self.stats.reads);
        let _ = writeln!(report, "Writes: {}", self.stats.writes);
        let _ = writeln!(report, "Suspensions: {}", self.stats.suspensions);
        let _ = writeln!(report, "Steps: {}", self.stats.steps);
        let _ = writeln!(report, "Final Tick: {}", self.stats.final_tick);
        let _ = writeln!(report, "Fingerprint: {}", self.fingerprint);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {:?}", i + 1, v);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );

        report
    }
}

/// One step of a task plan.
#[derive(Debug, Clone)]
enum Op {
    Write { slot: usize, value: u64 },
    Read { slot: usize },
    /// Read through a chain of plain function calls
    ReadDeep { slot: usize, depth: usize },
    Sleep(Tick),
    Yield,
    /// Suspend for the next scripted duration
    Pause,
    /// Await a nested async call running its own operations
    Nested(Vec<Op>),
}

struct TaskPlan {
    label: String,
    seed: Vec<(usize, u64)>,
    ops: Vec<Op>,
    fails: bool,
}

/// State shared by all simulated tasks of one run.
#[derive(Default)]
struct Shared {
    violations: RefCell<Vec<Violation>>,
    reads: Cell<u64>,
    writes: Cell<u64>,
    halted: Cell<bool>,
    stop_on_first: bool,
}

impl Shared {
    fn record(&self, violation: Violation) {
        tracing::warn!(?violation, "simulator violation");
        self.violations.borrow_mut().push(violation);
        if self.stop_on_first {
            self.halted.set(true);
        }
    }
}

/// Per-task view: the slots plus the task's model of their values.
struct SimTask {
    slots: Rc<[ContextSlot<u64>]>,
    model: RefCell<Vec<Option<u64>>>,
    shared: Rc<Shared>,
}

impl SimTask {
    fn expected(&self, slot: usize) -> u64 {
        self.model.borrow()[slot].unwrap_or(*self.slots[slot].default_value())
    }

    fn compare(&self, task: TaskId, slot: usize, actual: u64) {
        self.shared.reads.set(self.shared.reads.get() + 1);
        let expected = self.expected(slot);
        if actual != expected {
            self.shared.record(Violation::ValueMismatch {
                task,
                slot,
                expected,
                actual,
            });
        }
    }

    fn check(&self, task: TaskId, slot: usize) -> Result<(), ContextError> {
        let actual = self.slots[slot].get()?;
        self.compare(task, slot, actual);
        Ok(())
    }

    fn check_all(&self, task: TaskId) -> Result<(), ContextError> {
        (0..self.slots.len()).try_for_each(|slot| self.check(task, slot))
    }

    fn write(&self, slot: usize, value: u64) -> Result<(), ContextError> {
        self.slots[slot].set(value)?;
        self.model.borrow_mut()[slot] = Some(value);
        self.shared.writes.set(self.shared.writes.get() + 1);
        Ok(())
    }
}

static RUNS: AtomicU64 = AtomicU64::new(0);

/// Run the context simulator
///
/// # Errors
/// Fails only if the scheduler itself rejects the run, for example when
/// `config.scheduler.max_steps` runs out before every task finished.
/// The [`SchedulerError`](crate::error::SchedulerError) is the error's root.
pub fn run_simulator(config: SimulatorConfig) -> anyhow::Result<SimulatorReport> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let slot_count = config.slots.max(1);

    // Slot names must be unique per process; values never depend on them.
    let run = RUNS.fetch_add(1, Ordering::Relaxed);
    let slots: Rc<[ContextSlot<u64>]> = (0..slot_count)
        .map(|i| ContextSlot::declare(format!("simulator.{run}.{i}"), slot_default(i)))
        .collect::<Result<Vec<_>, _>>()?
        .into();

    let mut schedule = SuspensionSchedule::new();
    let plans: Vec<TaskPlan> = (0..config.tasks)
        .map(|index| {
            let plan = generate_plan(&mut rng, &config, slot_count, index);
            let pauses: Vec<Tick> = (0..rng.gen_range(0..4))
                .map(|_| rng.gen_range(0..=config.max_delay))
                .collect();
            schedule.insert(plan.label.clone(), pauses);
            plan
        })
        .collect();

    let shared = Rc::new(Shared {
        stop_on_first: config.stop_on_first_violation,
        ..Shared::default()
    });
    let mut scheduler: Scheduler<()> =
        Scheduler::with_config(config.scheduler.clone()).with_schedule(schedule);

    let mut handles = Vec::with_capacity(plans.len());
    let mut planned: HashMap<TaskId, bool> = HashMap::new();
    for plan in plans {
        let mut frame = ContextFrame::new();
        let mut model = vec![None; slot_count];
        for &(slot, value) in &plan.seed {
            frame.set(&slots[slot], value);
            model[slot] = Some(value);
        }
        let task = Rc::new(SimTask {
            slots: Rc::clone(&slots),
            model: RefCell::new(model),
            shared: Rc::clone(&shared),
        });
        let TaskPlan { label, ops, fails, .. } = plan;
        let handle = scheduler.spawn_with(
            SpawnOptions::new().label(label).seed(frame),
            move |cx| async move {
                let id = cx.id();
                task.check_all(id)?;
                execute(ops, Rc::clone(&task), cx).await?;
                if fails {
                    anyhow::bail!("planned failure in {id}");
                }
                Ok(())
            },
        );
        planned.insert(handle.id(), fails);
        handles.push(handle);
    }

    let results = scheduler.run_all(&handles)?;

    let mut stats = SimulatorStats {
        tasks: handles.len(),
        planned_failures: planned.values().filter(|f| **f).count(),
        ..SimulatorStats::default()
    };
    let halted = shared.halted.get();

    for handle in &handles {
        let id = handle.id();
        let fails = planned.get(&id).copied().unwrap_or(false);
        match results.get(&id) {
            None => shared.record(Violation::MissingResult { task: id }),
            Some(Ok(())) => {
                stats.completed += 1;
                if fails && !halted {
                    shared.record(Violation::UnexpectedSuccess { task: id });
                }
            }
            Some(Err(err)) => {
                stats.failed += 1;
                let planned_error = fails && matches!(err, TaskError::Failed(_));
                if !planned_error {
                    shared.record(Violation::UnexpectedFailure {
                        task: id,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    let trace = scheduler.trace();
    if let Err(crate::error::LogError::IntegrityViolation { index }) = trace.verify_integrity() {
        shared.record(Violation::BrokenTrace { index });
    }

    stats.reads = shared.reads.get();
    stats.writes = shared.writes.get();
    stats.suspensions = trace
        .events()
        .iter()
        .filter(|e| matches!(e.kind, crate::logging::TraceKind::Suspended { .. }))
        .count() as u64;
    stats.steps = scheduler.steps();
    stats.final_tick = scheduler.now();
    stats.trace_events = trace.len();

    let report = SimulatorReport {
        stats,
        violations: shared.violations.borrow().clone(),
        completion_order: results.keys().copied().collect(),
        fingerprint: trace.fingerprint(),
        config,
    };

    tracing::info!(
        seed = report.config.seed,
        tasks = report.stats.tasks,
        violations = report.violations.len(),
        fingerprint = %report.fingerprint,
        "simulation finished"
    );
    Ok(report)
}

fn execute(ops: Vec<Op>, task: Rc<SimTask>, cx: TaskCx) -> LocalBoxFuture<'static, anyhow::Result<()>> {
    async move {
        let id = cx.id();
        for op in ops {
            if task.shared.halted.get() {
                break;
            }
            match op {
                Op::Write { slot, value } => task.write(slot, value)?,
                Op::Read { slot } => task.check(id, slot)?,
                Op::ReadDeep { slot, depth } => {
                    let actual = read_through(&task.slots[slot], depth)?;
                    task.compare(id, slot, actual);
                }
                Op::Sleep(ticks) => {
                    cx.sleep(ticks).await?;
                    task.check_all(id)?;
                }
                Op::Yield => {
                    cx.yield_now().await?;
                    task.check_all(id)?;
                }
                Op::Pause => {
                    cx.pause().await?;
                    task.check_all(id)?;
                }
                Op::Nested(inner) => {
                    execute(inner, Rc::clone(&task), cx.clone()).await?;
                    task.check_all(id)?;
                }
            }
        }
        Ok(())
    }
    .boxed_local()
}

fn read_through(slot: &ContextSlot<u64>, depth: usize) -> Result<u64, ContextError> {
    if depth == 0 {
        slot.get()
    } else {
        read_through(slot, depth - 1)
    }
}

/// Defaults sit at the top of the value space, far from any task's writes.
fn slot_default(index: usize) -> u64 {
    u64::MAX - index as u64
}

/// Values carry the writing task in the high half.
fn task_value(task: usize, counter: &mut u64) -> u64 {
    *counter += 1;
    ((task as u64 + 1) << 32) | *counter
}

fn generate_plan(rng: &mut StdRng, config: &SimulatorConfig, slots: usize, index: usize) -> TaskPlan {
    let mut counter = 0;
    let seed = if rng.gen_bool(0.5) {
        (0..slots)
            .filter(|_| rng.gen_bool(0.5))
            .map(|slot| (slot, task_value(index, &mut counter)))
            .collect()
    } else {
        Vec::new()
    };
    let ops = generate_ops(rng, config, slots, index, 0, &mut counter);
    TaskPlan {
        label: format!("sim-{index}"),
        seed,
        ops,
        fails: rng.gen_bool(config.fail_rate.clamp(0.0, 1.0)),
    }
}

fn generate_ops(
    rng: &mut StdRng,
    config: &SimulatorConfig,
    slots: usize,
    task: usize,
    depth: usize,
    counter: &mut u64,
) -> Vec<Op> {
    let budget = (config.ops_per_task / (depth + 1)).max(1);
    let count = rng.gen_range(1..=budget);
    (0..count)
        .map(|_| match rng.gen_range(0..8) {
            0 | 1 => Op::Write {
                slot: rng.gen_range(0..slots),
                value: task_value(task, counter),
            },
            2 => Op::Read {
                slot: rng.gen_range(0..slots),
            },
            3 => Op::ReadDeep {
                slot: rng.gen_range(0..slots),
                depth: rng.gen_range(1..=config.max_depth.max(1)),
            },
            4 => Op::Sleep(rng.gen_range(0..=config.max_delay)),
            5 => Op::Yield,
            6 if depth < config.max_depth => {
                Op::Nested(generate_ops(rng, config, slots, task, depth + 1, counter))
            }
            _ => Op::Pause,
        })
        .collect()
}
