//! CLI for the quorumfuzz schedule fuzzer.
//!
//! # Usage
//!
//! ```bash
//! # Single fuzzing arm against a running TLC server
//! quorumfuzz --tlc 127.0.0.1:2023 fuzz
//!
//! # Compare guidance strategies over 5 repetitions
//! quorumfuzz --episodes 2000 --runs 5 compare
//!
//! # Replay a recorded trace corpus for its cumulative coverage curve
//! quorumfuzz measure --traces traces --out out
//! ```

use clap::{Parser, Subcommand};
use quorumfuzz_env::{log_prefix_agreement, EnvironmentConfig};
use quorumfuzz_explore::{
    Combined, Comparison, CoverageMeasurer, Empty, FuzzStats, Fuzzer, FuzzerConfig, Mutator,
    SwapCrashNodes, SwapMaxMessages, SwapNodes, TlcStateGuider, TraceCoverageGuider,
};
use quorumfuzz_trace::CoverageStats;

#[derive(Parser)]
#[command(name = "quorumfuzz")]
#[command(about = "Coverage-guided schedule fuzzer for an in-process Raft cluster")]
#[command(version)]
struct Cli {
    /// Number of fuzzing episodes to run.
    #[arg(short, long, default_value_t = 10_000, global = true)]
    episodes: usize,

    /// Scheduling steps per episode.
    #[arg(long, default_value_t = 100, global = true)]
    horizon: usize,

    /// Number of replicas in the cluster.
    #[arg(short, long, default_value_t = 3, global = true)]
    replicas: usize,

    /// Client requests injected per episode.
    #[arg(long, default_value_t = 1, global = true)]
    requests: usize,

    /// Repetitions to average over in compare mode.
    #[arg(long, default_value_t = 5, global = true)]
    runs: usize,

    /// Directory for results.
    #[arg(short, long, default_value = "results", global = true)]
    save: String,

    /// Record every explored trace to disk.
    #[arg(long, global = true)]
    record_traces: bool,

    /// TLC server address (host:port).
    #[arg(long, default_value = "127.0.0.1:2023", global = true)]
    tlc: String,

    /// Master seed for all randomness.
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single fuzzing arm.
    Fuzz,
    /// Compare guidance strategies side by side.
    Compare,
    /// Re-run a recorded trace corpus through the oracle.
    Measure {
        /// Directory of recorded traces.
        #[arg(long, default_value = "traces")]
        traces: String,
        /// Output directory for the coverage curve.
        #[arg(long, default_value = "out")]
        out: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Fuzz => cmd_fuzz(&cli),
        Commands::Compare => cmd_compare(&cli),
        Commands::Measure { traces, out } => {
            let (traces, out) = (traces.clone(), out.clone());
            cmd_measure(&cli, &traces, &out)
        }
    }
}

fn fuzzer_config(cli: &Cli) -> FuzzerConfig {
    FuzzerConfig {
        iterations: cli.episodes,
        horizon: cli.horizon,
        mut_per_trace: 5,
        seed_population_size: 10,
        number_requests: cli.requests,
        crash_quota: 10,
        max_messages_cap: 5,
        reseed_frequency: 2_000,
        seed: cli.seed,
        env: EnvironmentConfig {
            replicas: cli.replicas,
            election_tick: 20,
            heartbeat_tick: 4,
            // Must stay below election_tick / (replicas + 1) or nodes starve.
            ticks_per_step: 3,
        },
        checker: Some(log_prefix_agreement),
    }
}

/// The default mutation stack: perturb crash targets, delivery order and
/// per-link budgets.
fn schedule_mutator(seed: u64) -> Box<dyn Mutator> {
    Box::new(Combined::new(vec![
        Box::new(SwapCrashNodes::new(seed)),
        Box::new(SwapNodes::new(20, seed.wrapping_add(1))),
        Box::new(SwapMaxMessages::new(20, seed.wrapping_add(2))),
    ]))
}

fn state_guider(cli: &Cli, arm: &str) -> TlcStateGuider {
    if cli.record_traces {
        TlcStateGuider::with_recording(&cli.tlc, format!("{}/traces-{arm}", cli.save))
    } else {
        TlcStateGuider::new(&cli.tlc)
    }
}

fn print_summary(coverage: CoverageStats, stats: &FuzzStats) {
    println!("unique states:       {}", coverage.unique_states);
    println!("unique traces:       {}", coverage.unique_traces);
    println!("unique state traces: {}", coverage.unique_state_traces);
    println!("mutated executions:  {}", stats.mutated_executions);
    println!("random executions:   {}", stats.random_executions);
    println!("checker violations:  {}", stats.checker_violations);
    println!("execution errors:    {}", stats.execution_errors);
    for err in &stats.errors {
        println!("  error: {err}");
    }
}

fn cmd_fuzz(cli: &Cli) {
    let config = fuzzer_config(cli);
    eprintln!("quorumfuzz: {} episodes, horizon {}, {} replicas, TLC at {}",
        cli.episodes, cli.horizon, cli.replicas, cli.tlc);

    let guider = state_guider(cli, "fuzz");
    let mut mutator = schedule_mutator(cli.seed);
    let mut fuzzer = Fuzzer::new(config, mutator.as_mut(), &guider);
    let series = match fuzzer.run() {
        Ok(series) => series,
        Err(e) => {
            eprintln!("fuzzing aborted: {e}");
            std::process::exit(1);
        }
    };

    let coverage = series.last().copied().unwrap_or_default();
    print_summary(coverage, fuzzer.stats());

    if let Err(e) = std::fs::create_dir_all(&cli.save).and_then(|_| {
        let data = serde_json::to_vec_pretty(&series).unwrap_or_default();
        std::fs::write(format!("{}/coverage.json", cli.save), data)
    }) {
        eprintln!("warning: failed to save coverage series: {e}");
    }
}

fn cmd_compare(cli: &Cli) {
    let config = fuzzer_config(cli);
    eprintln!(
        "quorumfuzz compare: {} arms x {} runs, {} episodes each",
        4, cli.runs, cli.episodes
    );

    let mut comparison = Comparison::new(&cli.save, config, cli.runs);
    comparison.add(
        "traceCov",
        schedule_mutator(cli.seed),
        Box::new(TraceCoverageGuider::new(state_guider(cli, "traceCov"))),
    );
    comparison.add(
        "tlcstate",
        schedule_mutator(cli.seed.wrapping_add(100)),
        Box::new(state_guider(cli, "tlcstate")),
    );
    comparison.add(
        "random",
        Box::new(Empty),
        Box::new(state_guider(cli, "random")),
    );
    comparison.add(
        "randomTraceCov",
        Box::new(Empty),
        Box::new(TraceCoverageGuider::new(state_guider(cli, "randomTraceCov"))),
    );

    if let Err(e) = comparison.run() {
        eprintln!("comparison aborted: {e}");
        std::process::exit(1);
    }
    println!("results written to {}/data.json", cli.save);
}

fn cmd_measure(cli: &Cli, traces: &str, out: &str) {
    let mut measurer = CoverageMeasurer::new(traces, out, &cli.tlc);
    match measurer.measure() {
        Ok(coverages) => {
            let reached = coverages.last().copied().unwrap_or(0);
            println!("{} traces, {} unique states", coverages.len().saturating_sub(1), reached);
        }
        Err(e) => {
            eprintln!("measurement failed: {e}");
            std::process::exit(1);
        }
    }
}
