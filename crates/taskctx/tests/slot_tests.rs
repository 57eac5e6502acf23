use pretty_assertions::assert_eq;
use taskctx::prelude::*;
use taskctx::{lookup_slot, registered_slots};
use taskctx_test_utils::{declare_slot, unique_slot_name};

#[test]
fn duplicate_name_is_rejected() {
    let name = unique_slot_name("dup");
    ContextSlot::declare(name.clone(), 0u32).unwrap();
    assert_eq!(
        ContextSlot::declare(name.clone(), 1u32).unwrap_err(),
        ContextError::DuplicateSlot { name }
    );
}

#[test]
fn declaration_order_is_kept() {
    let first = declare_slot("order", 'a');
    let second = declare_slot("order", 'b');
    let names: Vec<String> = registered_slots().into_iter().map(|s| s.name).collect();
    let a = names.iter().position(|n| n == first.name()).unwrap();
    let b = names.iter().position(|n| n == second.name()).unwrap();
    assert!(a < b);
    assert_eq!(lookup_slot(first.name()).unwrap().id, first.id());
}

#[test]
fn get_outside_task_is_an_error() {
    let slot = declare_slot("outside", 1u16);
    let err = slot.get().unwrap_err();
    assert!(matches!(err, ContextError::NoActiveContext { .. }));
    assert!(err.to_string().contains(slot.name()));
}

#[test]
fn replace_update_and_is_set() {
    let slot = declare_slot("ops", 10i32);
    let mut scheduler = Scheduler::new();
    let s = slot.clone();

    let result = scheduler
        .run_task(move |_cx| async move {
            let was_set = s.is_set()?;
            let previous = s.replace(20)?;
            let updated = s.update(|v| v * 2)?;
            Ok((was_set, previous, updated, s.is_set()?, s.get()?))
        })
        .unwrap();

    assert_eq!(result.unwrap(), (false, 10, 40, true, 40));
}

#[test]
fn update_may_touch_other_slots() {
    let a = declare_slot("update-a", 1u8);
    let b = declare_slot("update-b", 2u8);
    let mut scheduler = Scheduler::new();
    let (sa, sb) = (a.clone(), b.clone());

    let result = scheduler
        .run_task(move |_cx| async move {
            sa.update(|v| v + sb.get().unwrap_or_default())?;
            Ok(sa.get()?)
        })
        .unwrap();
    assert_eq!(result.unwrap(), 3);
}

#[test]
fn non_clone_friendly_values_round_trip() {
    let slot = declare_slot("vec", Vec::<String>::new());
    let mut scheduler = Scheduler::new();
    let s = slot.clone();

    let result = scheduler
        .run_task(move |cx| async move {
            s.update(|mut v| {
                v.push("first".to_string());
                v
            })?;
            cx.yield_now().await?;
            s.update(|mut v| {
                v.push("second".to_string());
                v
            })?;
            Ok(s.get()?)
        })
        .unwrap();
    assert_eq!(result.unwrap(), vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn frame_seed_helpers() {
    let slot = declare_slot("frame", 7u64);
    let mut frame = ContextFrame::new().with(&slot, 1);
    assert!(frame.contains(&slot));
    assert_eq!(frame.get(&slot), 1);
    assert_eq!(frame.replace(&slot, 2), 1);
    assert!(frame.remove(&slot));
    assert_eq!(frame.get(&slot), 7);
    assert!(frame.is_empty());
}
