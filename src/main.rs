mod config;
mod harness;
mod mutex;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{ClusterConfig, SimConfig};
use harness::{run_cluster, simulate, CheckResult, Checker, HarnessError};

#[derive(Parser)]
#[command(name = "lmx")]
#[command(about = "Ricart-Agrawala mutual exclusion over Lamport clocks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a cluster with one thread per process
    Run(RunArgs),
    /// Run a deterministic seeded simulation
    Simulate(SimArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Number of processes
    #[arg(short = 'n', long, default_value_t = 4)]
    processes: u32,

    /// CS executions per process
    #[arg(short, long, default_value_t = 3)]
    attempts: u32,

    /// Minimum think time before a request (ms)
    #[arg(long, default_value_t = 0)]
    think_min_ms: u64,

    /// Maximum think time before a request (ms)
    #[arg(long, default_value_t = 200)]
    think_max_ms: u64,

    /// Minimum time spent inside the CS (ms)
    #[arg(long, default_value_t = 50)]
    hold_min_ms: u64,

    /// Maximum time spent inside the CS (ms)
    #[arg(long, default_value_t = 100)]
    hold_max_ms: u64,

    /// Minimum per-message latency (ms)
    #[arg(long, default_value_t = 0)]
    latency_min_ms: u64,

    /// Maximum per-message latency (ms)
    #[arg(long, default_value_t = 0)]
    latency_max_ms: u64,

    /// RNG seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
}

impl From<RunArgs> for ClusterConfig {
    fn from(args: RunArgs) -> Self {
        let ms = Duration::from_millis;
        ClusterConfig {
            processes: args.processes,
            attempts: args.attempts,
            think_time: (ms(args.think_min_ms), ms(args.think_max_ms)),
            hold_time: (ms(args.hold_min_ms), ms(args.hold_max_ms)),
            latency_range: (ms(args.latency_min_ms), ms(args.latency_max_ms)),
            seed: args.seed,
        }
    }
}

#[derive(Args)]
struct SimArgs {
    /// Number of processes
    #[arg(short = 'n', long, default_value_t = 3)]
    processes: u32,

    /// CS executions per process
    #[arg(short, long, default_value_t = 2)]
    attempts: u32,

    /// Schedule seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Scheduler steps before giving up
    #[arg(long, default_value_t = 100_000)]
    max_steps: u64,
}

impl From<SimArgs> for SimConfig {
    fn from(args: SimArgs) -> Self {
        SimConfig {
            processes: args.processes,
            attempts: args.attempts,
            seed: args.seed,
            max_steps: args.max_steps,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args.into()),
        Command::Simulate(args) => run_simulation(args.into()),
    };

    match result {
        Ok(check) if check.passed => ExitCode::SUCCESS,
        Ok(check) => {
            for violation in &check.violations {
                error!(kind = ?violation.kind, "{}", violation.description);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ClusterConfig) -> Result<CheckResult, HarnessError> {
    let outcome = run_cluster(&config)?;

    for report in &outcome.reports {
        info!(
            process = report.process,
            entries = report.entries,
            clock = report.final_clock,
            requests_sent = report.stats.requests_sent,
            replies_deferred = report.stats.replies_deferred,
            "process finished"
        );
    }
    info!(
        executions = outcome.total_entries(),
        expected = config.expected_entries(),
        passed = outcome.check.passed,
        "run complete"
    );
    Ok(outcome.check)
}

fn run_simulation(config: SimConfig) -> Result<CheckResult, HarnessError> {
    let outcome = simulate(&config)?;
    let check = Checker::new(config.processes, config.attempts).verify(&outcome.history);

    info!(
        seed = outcome.seed,
        steps = outcome.steps,
        delivered = outcome.delivered,
        executions = check.stats.entries,
        passed = check.passed,
        "simulation complete"
    );
    Ok(check)
}
