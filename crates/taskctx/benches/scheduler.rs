//! Scheduler throughput benchmarks.
//!
//! - spawn + run of tasks that complete without suspending
//! - tasks that sleep and yield, exercising the timer queue
//! - slot reads and writes inside a running task

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use taskctx::prelude::*;

fn slot(prefix: &str) -> ContextSlot<u64> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let name = format!("bench.{prefix}.{}", NEXT.fetch_add(1, Ordering::Relaxed));
    ContextSlot::declare(name, 0).unwrap()
}

fn bench_spawn_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/spawn_run");

    for tasks in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(tasks));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let mut scheduler: Scheduler<u64> = Scheduler::new();
                let handles: Vec<_> = (0..tasks)
                    .map(|i| scheduler.spawn(move |_| async move { Ok(i) }))
                    .collect();
                black_box(scheduler.run_all(&handles).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_suspending_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/suspend");
    let request_id = slot("suspend");

    for tasks in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(tasks));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let mut scheduler: Scheduler<u64> = Scheduler::new();
                let handles: Vec<_> = (0..tasks)
                    .map(|i| {
                        let slot = request_id.clone();
                        scheduler.spawn_seeded(
                            ContextFrame::new().with(&request_id, i),
                            move |cx| async move {
                                cx.sleep(i % 7).await?;
                                cx.yield_now().await?;
                                Ok(slot.get()?)
                            },
                        )
                    })
                    .collect();
                black_box(scheduler.run_all(&handles).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_slot_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot/access");
    let counter = slot("access");

    group.bench_function("get_set_1000", |b| {
        b.iter(|| {
            let mut scheduler: Scheduler<u64> = Scheduler::new();
            let slot = counter.clone();
            let result = scheduler
                .run_task(move |_| async move {
                    for _ in 0..1_000 {
                        slot.set(slot.get()? + 1)?;
                    }
                    Ok(slot.get()?)
                })
                .unwrap();
            black_box(result.unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_spawn_run,
    bench_suspending_tasks,
    bench_slot_access
);
criterion_main!(benches);
