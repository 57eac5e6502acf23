use taskctx::state_machine::{allowed_transitions, validate_transition};
use taskctx::TaskState;
use proptest::prelude::*;

#[test]
fn test_created_transitions() {
    assert!(validate_transition(TaskState::Created, TaskState::Running).is_ok());
    assert!(validate_transition(TaskState::Created, TaskState::Failed).is_ok());

    // Invalid
    assert!(validate_transition(TaskState::Created, TaskState::Suspended).is_err());
    assert!(validate_transition(TaskState::Created, TaskState::Completed).is_err());
}

#[test]
fn test_suspended_transitions() {
    assert!(validate_transition(TaskState::Suspended, TaskState::Running).is_ok());
    assert!(validate_transition(TaskState::Suspended, TaskState::Failed).is_ok());

    assert!(validate_transition(TaskState::Suspended, TaskState::Completed).is_err());
}

#[test]
fn test_terminal_states_are_final() {
    for state in [TaskState::Completed, TaskState::Failed] {
        assert!(state.is_terminal());
        assert!(allowed_transitions(state).is_empty());
    }
}

fn any_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Created),
        Just(TaskState::Running),
        Just(TaskState::Suspended),
        Just(TaskState::Completed),
        Just(TaskState::Failed),
    ]
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in any_state(), to in any_state()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }
}
