use futures::channel::oneshot;
use pretty_assertions::assert_eq;
use taskctx::prelude::*;
use taskctx::{SchedulerConfig, TaskState};
use taskctx_test_utils::{declare_slot, init_test_tracing, Recorder};

#[test]
fn request_ids_survive_interleaving() {
    init_test_tracing();
    let request_id = declare_slot("request_id", 42u64);
    let recorder = Recorder::new();
    let mut scheduler = Scheduler::new();

    let mut handles = Vec::new();
    for (seed, delay) in [(1u64, 1u64), (2, 2), (3, 1)] {
        let slot = request_id.clone();
        let rec = recorder.clone();
        handles.push(scheduler.spawn_seeded(
            ContextFrame::new().with(&request_id, seed),
            move |cx| async move {
                cx.sleep(delay).await?;
                let seen = slot.get()?;
                rec.record((seed, seen));
                Ok(seen)
            },
        ));
    }

    let results = scheduler.run_all(&handles).unwrap();

    // Tasks 1 and 3 wake at tick 1 in registration order, task 2 at tick 2.
    let order: Vec<TaskId> = results.keys().copied().collect();
    assert_eq!(order, vec![handles[0].id(), handles[2].id(), handles[1].id()]);

    for (handle, want) in handles.iter().zip([1u64, 2, 3]) {
        assert_eq!(*results[&handle.id()].as_ref().unwrap(), want);
    }
    let mut recorded = recorder.entries();
    recorded.sort_unstable();
    assert_eq!(recorded, vec![(1, 1), (2, 2), (3, 3)]);
}

#[test]
fn unseeded_task_reads_default() {
    let request_id = declare_slot("request_id", 42u64);
    let mut scheduler = Scheduler::new();
    let slot = request_id.clone();

    let result = scheduler
        .run_task(move |_cx| async move { Ok(slot.get()?) })
        .unwrap();
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn writes_are_invisible_to_siblings() {
    let slot = declare_slot("isolation", 0u32);
    let mut scheduler = Scheduler::new();

    let writer = {
        let slot = slot.clone();
        scheduler.spawn(move |cx| async move {
            slot.set(99)?;
            cx.yield_now().await?;
            Ok(slot.get()?)
        })
    };
    let reader = {
        let slot = slot.clone();
        scheduler.spawn(move |cx| async move {
            cx.yield_now().await?;
            let before = slot.get()?;
            cx.yield_now().await?;
            Ok(before + slot.get()?)
        })
    };

    let results = scheduler.run_all(&[writer, reader]).unwrap();
    assert_eq!(*results[&writer.id()].as_ref().unwrap(), 99);
    assert_eq!(*results[&reader.id()].as_ref().unwrap(), 0);
}

#[test]
fn seed_is_copied_not_shared() {
    let slot = declare_slot("seed-copy", 0u8);
    let seed = ContextFrame::new().with(&slot, 5);
    let mut scheduler = Scheduler::new();

    let a = {
        let slot = slot.clone();
        scheduler.spawn_seeded(seed, move |cx| async move {
            slot.set(6)?;
            cx.sleep(1).await?;
            Ok(slot.get()?)
        })
    };
    let b = {
        let slot = slot.clone();
        scheduler.spawn_seeded(ContextFrame::new().with(&slot, 5), move |cx| async move {
            cx.sleep(2).await?;
            Ok(slot.get()?)
        })
    };

    let results = scheduler.run_all(&[a, b]).unwrap();
    assert_eq!(*results[&a.id()].as_ref().unwrap(), 6);
    assert_eq!(*results[&b.id()].as_ref().unwrap(), 5);
}

fn read_nested(slot: &ContextSlot<String>, depth: usize) -> Result<String, ContextError> {
    if depth == 0 {
        slot.get()
    } else {
        read_nested(slot, depth - 1)
    }
}

async fn nested_async(slot: ContextSlot<String>) -> anyhow::Result<String> {
    yield_now().await?;
    slot.set(format!("{}+inner", slot.get()?))?;
    sleep(2).await?;
    Ok(slot.get()?)
}

#[test]
fn values_propagate_into_nested_calls() {
    let slot = declare_slot("nested", String::from("none"));
    let mut scheduler = Scheduler::new();
    let s = slot.clone();

    let result = scheduler
        .run_task(move |cx| async move {
            s.set("outer".to_string())?;
            let deep = read_nested(&s, 5)?;
            cx.sleep(1).await?;
            let after_inner = nested_async(s.clone()).await?;
            Ok(format!("{deep}|{after_inner}|{}", s.get()?))
        })
        .unwrap();

    assert_eq!(result.unwrap(), "outer|outer+inner|outer+inner");
}

#[test]
fn failure_is_contained() {
    let mut scheduler: Scheduler<u32> = Scheduler::new();
    let ok_a = scheduler.spawn(|cx| async move {
        cx.sleep(1).await?;
        Ok(1)
    });
    let bad = scheduler.spawn(|cx| async move {
        cx.yield_now().await?;
        anyhow::bail!("boom")
    });
    let ok_b = scheduler.spawn(|_| async { Ok(2) });

    let results = scheduler.run_all(&[ok_a, bad, ok_b]).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(*results[&ok_a.id()].as_ref().unwrap(), 1);
    assert_eq!(*results[&ok_b.id()].as_ref().unwrap(), 2);

    let err = results[&bad.id()].as_ref().unwrap_err();
    assert!(err.is_failure());
    assert!(err.to_string().contains("boom"));
    assert_eq!(scheduler.state(&bad).unwrap(), TaskState::Failed);
    assert_eq!(scheduler.state(&ok_a).unwrap(), TaskState::Completed);
}

#[test]
fn panic_is_contained() {
    let mut scheduler: Scheduler<()> = Scheduler::new();
    let panicking = scheduler.spawn(|cx| async move {
        cx.yield_now().await?;
        panic!("task exploded");
    });
    let sibling = scheduler.spawn(|cx| async move {
        cx.sleep(3).await?;
        Ok(())
    });

    let results = scheduler.run_all(&[panicking, sibling]).unwrap();
    match &results[&panicking.id()] {
        Err(TaskError::Panicked(msg)) => assert_eq!(msg, "task exploded"),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(results[&sibling.id()].is_ok());
    assert_eq!(taskctx::current_task(), None);
}

#[test]
fn replay_is_deterministic() {
    fn run_once(slot: &ContextSlot<u64>) -> (Vec<TaskId>, String) {
        let mut scheduler = Scheduler::new();
        let handles: Vec<_> = [3u64, 1, 4, 1, 5, 9, 2, 6]
            .into_iter()
            .enumerate()
            .map(|(i, delay)| {
                let slot = slot.clone();
                scheduler.spawn_seeded(
                    ContextFrame::new().with(&slot, i as u64),
                    move |cx| async move {
                        cx.sleep(delay).await?;
                        cx.yield_now().await?;
                        cx.sleep(delay % 3).await?;
                        Ok(slot.get()?)
                    },
                )
            })
            .collect();
        let results = scheduler.run_all(&handles).unwrap();
        (
            results.keys().copied().collect(),
            scheduler.trace().fingerprint(),
        )
    }

    let slot = declare_slot("replay", 0u64);
    let (first_order, first_print) = run_once(&slot);
    let (second_order, second_print) = run_once(&slot);
    assert_eq!(first_order, second_order);
    assert_eq!(first_print, second_print);
}

#[test]
fn ready_tasks_run_in_spawn_order() {
    let recorder = Recorder::new();
    let mut scheduler: Scheduler<()> = Scheduler::new();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let rec = recorder.clone();
            scheduler.spawn(move |cx| async move {
                rec.record((i, 0));
                cx.yield_now().await?;
                rec.record((i, 1));
                Ok(())
            })
        })
        .collect();

    scheduler.run_all(&handles).unwrap();
    assert_eq!(
        recorder.entries(),
        vec![(0, 0), (1, 0), (2, 0), (3, 0), (0, 1), (1, 1), (2, 1), (3, 1)]
    );
}

#[test]
fn signal_releases_waiters() {
    let signal = Signal::new();
    let mut scheduler: Scheduler<Tick> = Scheduler::new();

    let waiter = {
        let signal = signal.clone();
        scheduler.spawn(move |cx| async move {
            cx.wait(&signal).await?;
            Ok(cx.now()?)
        })
    };
    let raiser = {
        let signal = signal.clone();
        scheduler.spawn(move |cx| async move {
            cx.sleep(4).await?;
            cx.notify(&signal);
            Ok(cx.now()?)
        })
    };

    let results = scheduler.run_all(&[waiter, raiser]).unwrap();
    let order: Vec<TaskId> = results.keys().copied().collect();
    assert_eq!(order, vec![raiser.id(), waiter.id()]);
    assert_eq!(*results[&waiter.id()].as_ref().unwrap(), 4);
}

#[test]
fn waiting_on_raised_signal_does_not_suspend() {
    let signal = Signal::new();
    signal.raise();
    let mut scheduler: Scheduler<()> = Scheduler::new();
    let s = signal.clone();
    let result = scheduler
        .run_task(move |cx| async move {
            cx.wait(&s).await?;
            Ok(())
        })
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(scheduler.steps(), 1);
}

#[test]
fn unsatisfiable_wait_stalls() {
    let mut scheduler: Scheduler<()> = Scheduler::new();
    let never = Signal::new();
    let stuck = scheduler.spawn(move |cx| async move {
        cx.wait(&never).await?;
        Ok(())
    });
    let fine = scheduler.spawn(|cx| async move {
        cx.sleep(10).await?;
        Ok(())
    });

    let results = scheduler.run_all(&[stuck, fine]).unwrap();
    assert!(matches!(results[&stuck.id()], Err(TaskError::Stalled)));
    assert!(results[&fine.id()].is_ok());
    assert_eq!(scheduler.now(), 10);
}

#[test]
fn foreign_future_without_waker_stalls() {
    let mut scheduler: Scheduler<()> = Scheduler::new();
    let stuck = scheduler.spawn(|_cx| async move {
        futures::future::pending::<()>().await;
        Ok(())
    });
    let fine = scheduler.spawn(|cx| async move {
        cx.sleep(3).await?;
        Ok(())
    });

    let results = scheduler.run_all(&[stuck, fine]).unwrap();
    assert!(matches!(results[&stuck.id()], Err(TaskError::Stalled)));
    assert!(results[&fine.id()].is_ok());
    assert_eq!(scheduler.state(&stuck).unwrap(), TaskState::Failed);
}

#[test]
fn foreign_futures_are_driven_by_their_waker() {
    let (tx, rx) = oneshot::channel::<u32>();
    let mut scheduler: Scheduler<u32> = Scheduler::new();

    let receiver = scheduler.spawn(move |_cx| async move { Ok(rx.await? + 1) });
    let sender = scheduler.spawn(move |cx| async move {
        cx.sleep(2).await?;
        tx.send(41).map_err(|_| anyhow::anyhow!("receiver dropped"))?;
        Ok(0)
    });

    let results = scheduler.run_all(&[receiver, sender]).unwrap();
    assert_eq!(*results[&receiver.id()].as_ref().unwrap(), 42);
}

#[test]
fn slot_access_survives_foreign_await() {
    let slot = declare_slot("foreign", 1u8);
    let (tx, rx) = oneshot::channel::<()>();
    let mut scheduler: Scheduler<u8> = Scheduler::new();

    let waiting = {
        let slot = slot.clone();
        scheduler.spawn(move |_cx| async move {
            slot.set(7)?;
            rx.await?;
            Ok(slot.get()?)
        })
    };
    let other = {
        let slot = slot.clone();
        scheduler.spawn(move |cx| async move {
            slot.set(3)?;
            cx.yield_now().await?;
            let _ = tx.send(());
            Ok(slot.get()?)
        })
    };

    let results = scheduler.run_all(&[waiting, other]).unwrap();
    assert_eq!(*results[&waiting.id()].as_ref().unwrap(), 7);
    assert_eq!(*results[&other.id()].as_ref().unwrap(), 3);
}

#[test]
fn suspend_current_after_zero_is_a_yield() {
    let mut scheduler: Scheduler<Tick> = Scheduler::new();
    let handle = scheduler.spawn(|cx| async move {
        suspend_current(WakeCondition::After(0)).await?;
        cx.suspend(WakeCondition::Yield).await?;
        Ok(cx.now()?)
    });
    let results = scheduler.run_all(&[handle]).unwrap();
    assert_eq!(*results[&handle.id()].as_ref().unwrap(), 0);
    assert_eq!(scheduler.steps(), 3);
}

#[test]
fn run_all_returns_only_requested_tasks() {
    let mut scheduler: Scheduler<u8> = Scheduler::new();
    let wanted = scheduler.spawn(|cx| async move {
        cx.sleep(1).await?;
        Ok(1)
    });
    let other = scheduler.spawn(|_| async { Ok(2) });

    let results = scheduler.run_all(&[wanted]).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results.contains_key(&wanted.id()));

    // `other` finished along the way and can still be collected.
    assert_eq!(scheduler.take_outcome(&other).unwrap().unwrap().unwrap(), 2);
}

#[test]
fn run_all_with_no_handles_is_empty() {
    let mut scheduler: Scheduler<()> = Scheduler::new();
    assert!(scheduler.run_all(&[]).unwrap().is_empty());
}

#[test]
fn step_budget_from_config() {
    let mut scheduler: Scheduler<()> =
        Scheduler::with_config(SchedulerConfig::new().with_max_steps(3));
    let handle = scheduler.spawn(|cx| async move {
        for _ in 0..10 {
            cx.yield_now().await?;
        }
        Ok(())
    });
    assert_eq!(
        scheduler.run_all(&[handle]).unwrap_err(),
        SchedulerError::StepLimitExceeded { steps: 3 }
    );
}
