use crate::types::Tick;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Scripted pause durations per task label.
///
/// Handed to [`Scheduler::with_schedule`](super::Scheduler::with_schedule);
/// each task's [`TaskCx::pause`](super::TaskCx::pause) consumes the next
/// duration scripted for its label. Replaying the same schedule over the same
/// spawns reproduces the same interleaving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionSchedule {
    pauses: BTreeMap<String, Vec<Tick>>,
}

impl SuspensionSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, label: impl Into<String>, durations: impl IntoIterator<Item = Tick>) -> Self {
        self.insert(label, durations);
        self
    }

    /// Append durations to the script for `label`
    pub fn insert(&mut self, label: impl Into<String>, durations: impl IntoIterator<Item = Tick>) {
        self.pauses.entry(label.into()).or_default().extend(durations);
    }

    /// The scripted durations for `label`, in order
    #[must_use]
    pub fn pauses_for(&self, label: &str) -> VecDeque<Tick> {
        self.pauses
            .get(label)
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.pauses.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pauses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pauses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_accumulate_per_label() {
        let mut schedule = SuspensionSchedule::new().with("a", [1, 2]);
        schedule.insert("a", [3]);
        schedule.insert("b", Vec::<Tick>::new());

        assert_eq!(schedule.pauses_for("a"), VecDeque::from(vec![1, 2, 3]));
        assert!(schedule.pauses_for("b").is_empty());
        assert!(schedule.pauses_for("missing").is_empty());
        assert_eq!(schedule.labels().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
