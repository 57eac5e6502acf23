// Test harness module
// Randomized context simulator and replay certification

pub mod simulator;

pub use simulator::*;

use crate::config::SchedulerConfig;
use serde::Serialize;

/// Test harness for running stress tests and certification
pub struct TestHarness;

impl TestHarness {
    /// Run the simulator over `tasks` tasks, `iterations` times with
    /// consecutive seeds
    ///
    /// # Errors
    /// Propagates scheduler failures from [`run_simulator`].
    pub fn run_stress_test(tasks: usize, iterations: u64) -> anyhow::Result<StressTestReport> {
        tracing::info!(tasks, iterations, "running stress test");

        let mut violations = 0;
        for seed in 0..iterations {
            let config = SimulatorConfig {
                seed,
                tasks,
                ..SimulatorConfig::default()
            };
            violations += run_simulator(config)?.violations.len();
        }

        Ok(StressTestReport {
            tasks,
            iterations,
            violations,
            success: violations == 0,
        })
    }

    /// Run every seed in `0..seeds` twice and require identical
    /// interleavings on replay
    ///
    /// # Errors
    /// Propagates scheduler failures from [`run_simulator`].
    pub fn run_certification(seeds: u64) -> anyhow::Result<CertificationReport> {
        Self::run_certification_with(seeds, &SchedulerConfig::default())
    }

    /// [`run_certification`](Self::run_certification) on schedulers built
    /// from `scheduler`
    ///
    /// # Errors
    /// Propagates scheduler failures from [`run_simulator`].
    pub fn run_certification_with(
        seeds: u64,
        scheduler: &SchedulerConfig,
    ) -> anyhow::Result<CertificationReport> {
        tracing::info!(seeds, "running certification");

        let mut total_violations = 0;
        let mut replay_divergences = 0;

        for seed in 0..seeds {
            let config = SimulatorConfig {
                seed,
                scheduler: scheduler.clone(),
                ..SimulatorConfig::default()
            };

            let first = run_simulator(config.clone())?;
            let replay = run_simulator(config)?;

            total_violations += first.violations.len() + replay.violations.len();
            if let Some(divergence) = compare_runs(seed, &first, &replay) {
                tracing::warn!(?divergence, "replay diverged");
                replay_divergences += 1;
            }
        }

        Ok(CertificationReport {
            passed: total_violations == 0 && replay_divergences == 0,
            total_violations,
            replay_divergences,
            seeds_tested: seeds,
        })
    }
}

/// `Some` when two runs of the same seed did not interleave identically
#[must_use]
pub fn compare_runs(seed: u64, first: &SimulatorReport, second: &SimulatorReport) -> Option<Violation> {
    if first.fingerprint != second.fingerprint {
        return Some(Violation::ReplayDivergence {
            seed,
            first: first.fingerprint.clone(),
            second: second.fingerprint.clone(),
        });
    }
    if first.completion_order != second.completion_order {
        return Some(Violation::ReplayDivergence {
            seed,
            first: format!("{:?}", first.completion_order),
            second: format!("{:?}", second.completion_order),
        });
    }
    None
}

/// Report from a stress test
#[derive(Debug, Clone, Serialize)]
pub struct StressTestReport {
    /// Tasks per run
    pub tasks: usize,
    /// Runs performed
    pub iterations: u64,
    /// Violations summed over all runs
    pub violations: usize,
    pub success: bool,
}

/// Report from certification
#[derive(Debug, Clone, Serialize)]
pub struct CertificationReport {
    /// No violations and no replay divergences
    pub passed: bool,
    /// Violations summed over both runs of every seed
    pub total_violations: usize,
    /// Seeds whose replay interleaved differently
    pub replay_divergences: usize,
    pub seeds_tested: u64,
}
