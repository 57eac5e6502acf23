use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::process::ExitCode;
use taskctx::logging::init_tracing;
use taskctx::prelude::*;
use taskctx::test_harness::{run_simulator, SimulatorConfig, TestHarness};
use taskctx::SchedulerConfig;

fn cli() -> Command {
    Command::new("taskctx")
        .version(taskctx::VERSION)
        .about("Task-scoped context slots on a cooperative scheduler")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .help("Scheduler configuration (TOML)"),
        )
        .subcommand(
            Command::new("demo")
                .about("Run the request-id walkthrough")
                .arg(
                    Arg::new("tasks")
                        .long("tasks")
                        .default_value("20")
                        .value_parser(value_parser!(u64))
                        .help("Number of tasks to spawn"),
                )
                .arg(
                    Arg::new("delay")
                        .long("delay")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Longest sleep per task, in ticks"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the context simulator")
                .arg(
                    Arg::new("tasks")
                        .long("tasks")
                        .default_value("50")
                        .value_parser(value_parser!(usize))
                        .help("Number of simulated tasks"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("max-depth")
                        .long("max-depth")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Maximum nesting of calls inside a task"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("certify")
                .about("Run the simulator over several seeds and check replays")
                .arg(
                    Arg::new("seeds")
                        .long("seeds")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("Number of seeds to certify"),
                ),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_filter);

    let outcome = match matches.subcommand() {
        Some(("demo", args)) => demo(config, args),
        Some(("simulate", args)) => simulate(config, args),
        Some(("certify", args)) => certify(&config, args),
        _ => {
            let _ = cli().print_help();
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<SchedulerConfig> {
    let config = match matches.get_one::<String>("config") {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str, fallback: T) -> T {
    args.get_one::<T>(name).cloned().unwrap_or(fallback)
}

/// Spawn `tasks` tasks that each stamp their own request id, sleep, and
/// report what they read after resuming. Every third task is left unseeded
/// and reads the default.
fn demo(config: SchedulerConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let tasks = arg(args, "tasks", 20u64);
    let delay = arg(args, "delay", 5u64).max(1);

    let request_id = ContextSlot::declare("request_id", 42u64)?;
    let mut scheduler: Scheduler<u64> = Scheduler::with_config(config);

    let mut expected = Vec::new();
    let mut handles = Vec::new();
    for n in 1..=tasks {
        let slot = request_id.clone();
        let ticks = (n * 7) % delay + 1;
        let entry = move |cx: TaskCx| async move {
            cx.sleep(ticks).await?;
            Ok(slot.get()?)
        };
        let handle = if n % 3 == 0 {
            scheduler.spawn(entry)
        } else {
            scheduler.spawn_seeded(ContextFrame::new().with(&request_id, n), entry)
        };
        expected.push((handle.id(), if n % 3 == 0 { 42 } else { n }));
        handles.push(handle);
    }

    let results = scheduler.run_all(&handles)?;
    let mut ok = true;
    for (task, result) in &results {
        let want = expected
            .iter()
            .find_map(|(id, want)| (id == task).then_some(*want));
        match result {
            Ok(seen) => {
                let status = if Some(*seen) == want { "ok" } else { "MISMATCH" };
                ok &= Some(*seen) == want;
                println!("{task}: request_id = {seen} [{status}]");
            }
            Err(err) => {
                ok = false;
                println!("{task}: {err}");
            }
        }
    }

    println!();
    println!("Tasks: {}", results.len());
    println!("Final tick: {}", scheduler.now());
    println!("Fingerprint: {}", scheduler.trace().fingerprint());
    println!("Status: {}", if ok { "PASSED" } else { "FAILED" });
    Ok(ok)
}

fn simulate(scheduler: SchedulerConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let config = SimulatorConfig {
        scheduler,
        seed: arg(args, "seed", 42u64),
        tasks: arg(args, "tasks", 50usize),
        max_depth: arg(args, "max-depth", 3usize),
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        ..SimulatorConfig::default()
    };

    let report = run_simulator(config)?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn certify(scheduler: &SchedulerConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let seeds = arg(args, "seeds", 10u64);
    let report = TestHarness::run_certification_with(seeds, scheduler)?;

    println!("Certification Report:");
    println!("  Seeds Tested: {}", report.seeds_tested);
    println!("  Total Violations: {}", report.total_violations);
    println!("  Replay Divergences: {}", report.replay_divergences);
    println!("  Status: {}", if report.passed { "PASSED" } else { "FAILED" });
    Ok(report.passed)
}
