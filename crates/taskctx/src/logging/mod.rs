//! Scheduler trace and `tracing` setup.
//!
//! The scheduler appends one [`TraceEvent`] per lifecycle step to an
//! [`EventLog`]. Events are SHA-256 hash-chained, so the hash of the last
//! event fingerprints the whole interleaving: two runs with the same spawns
//! and the same suspension schedule produce the same fingerprint.

use crate::error::LogError;
use crate::types::{TaskId, Tick};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

/// What happened to a task at one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceKind {
    /// Registered with the scheduler
    Spawned { label: String },
    /// Polled once
    Dispatched,
    /// Parked with this many wake requests
    Suspended { wakes: usize },
    /// Returned a value
    Completed,
    /// Returned an error or panicked
    Failed { reason: String },
    /// Cancelled before it finished
    Cancelled,
    /// Waiting on something that can no longer happen
    Stalled,
}

impl TraceKind {
    fn tag(&self) -> &'static str {
        match self {
            TraceKind::Spawned { .. } => "spawned",
            TraceKind::Dispatched => "dispatched",
            TraceKind::Suspended { .. } => "suspended",
            TraceKind::Completed => "completed",
            TraceKind::Failed { .. } => "failed",
            TraceKind::Cancelled => "cancelled",
            TraceKind::Stalled => "stalled",
        }
    }

    fn detail(&self) -> String {
        match self {
            TraceKind::Spawned { label } => label.clone(),
            TraceKind::Suspended { wakes } => wakes.to_string(),
            TraceKind::Failed { reason } => reason.clone(),
            _ => String::new(),
        }
    }
}

/// One entry of the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the log
    pub seq: u64,
    /// Scheduler dispatch count when recorded
    pub step: u64,
    /// Virtual time when recorded
    pub tick: Tick,
    pub task: TaskId,
    pub kind: TraceKind,
    /// Hash of the previous event, zeroes for the first
    pub prev_hash: [u8; 32],
    /// SHA-256 over `prev_hash` and this event's fields
    pub hash: [u8; 32],
}

/// Append-only, hash-chained scheduler trace.
///
/// Once `capacity` events are stored further events are dropped and
/// [`is_truncated`](Self::is_truncated) reports it; the fingerprint then
/// covers only the recorded prefix.
#[derive(Debug)]
pub struct EventLog {
    events: Vec<TraceEvent>,
    capacity: usize,
    truncated: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(65_536)
    }
}

impl EventLog {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity,
            truncated: false,
        }
    }

    pub fn append(&mut self, step: u64, tick: Tick, task: TaskId, kind: TraceKind) {
        if self.events.len() >= self.capacity {
            self.truncated = true;
            return;
        }
        let prev_hash = self.events.last().map_or([0u8; 32], |e| e.hash);
        let mut event = TraceEvent {
            seq: self.events.len() as u64,
            step,
            tick,
            task,
            kind,
            prev_hash,
            hash: [0u8; 32],
        };
        event.hash = compute_hash(&event);
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Events concerning one task, in order
    pub fn events_for(&self, task: TaskId) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(move |e| e.task == task)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Hex digest of the last event (all zeros for an empty log)
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(self.events.last().map_or([0u8; 32], |e| e.hash))
    }

    pub fn verify_integrity(&self) -> Result<(), LogError> {
        let mut prev = [0u8; 32];
        for (index, e) in self.events.iter().enumerate() {
            if e.prev_hash != prev || e.hash != compute_hash(e) {
                return Err(LogError::IntegrityViolation { index });
            }
            prev = e.hash;
        }
        Ok(())
    }
}

fn compute_hash(event: &TraceEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.seq.to_le_bytes());
    hasher.update(event.step.to_le_bytes());
    hasher.update(event.tick.to_le_bytes());
    hasher.update(event.task.0.to_le_bytes());
    hasher.update(event.kind.tag().as_bytes());
    hasher.update([0]);
    hasher.update(event.kind.detail().as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash);
    hasher.finalize().into()
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> EventLog {
        let mut log = EventLog::default();
        log.append(0, 0, TaskId(1), TraceKind::Spawned { label: "a".to_string() });
        log.append(1, 0, TaskId(1), TraceKind::Dispatched);
        log.append(1, 0, TaskId(1), TraceKind::Suspended { wakes: 1 });
        log
    }

    #[test]
    fn chain_verifies() {
        let log = sample_log();
        assert_eq!(log.len(), 3);
        assert!(log.verify_integrity().is_ok());
        assert_eq!(log.events()[1].prev_hash, log.events()[0].hash);
    }

    #[test]
    fn tampering_is_detected() {
        let mut log = sample_log();
        log.events[1].tick = 99;
        assert_eq!(
            log.verify_integrity(),
            Err(LogError::IntegrityViolation { index: 1 })
        );
    }

    #[test]
    fn identical_histories_share_fingerprint() {
        assert_eq!(sample_log().fingerprint(), sample_log().fingerprint());

        let mut other = sample_log();
        other.append(2, 1, TaskId(1), TraceKind::Completed);
        assert_ne!(other.fingerprint(), sample_log().fingerprint());
    }

    #[test]
    fn capacity_truncates() {
        let mut log = EventLog::with_capacity(2);
        log.append(0, 0, TaskId(1), TraceKind::Dispatched);
        log.append(0, 0, TaskId(1), TraceKind::Completed);
        log.append(0, 0, TaskId(2), TraceKind::Dispatched);
        assert_eq!(log.len(), 2);
        assert!(log.is_truncated());
    }

    #[test]
    fn empty_fingerprint_is_zero() {
        assert_eq!(EventLog::default().fingerprint(), "0".repeat(64));
    }
}
