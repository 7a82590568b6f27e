//! corun - CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use corun::util::{config, logger};
use corun::workload::{queue_stress, run_countdown, StressConfig};
use corun::{QueueKind, NAME, VERSION};
use std::path::PathBuf;

/// Cooperative task runtime driver
#[derive(Parser, Debug)]
#[command(name = "corun")]
#[command(version = VERSION)]
#[command(about = "Run reference workloads on the cooperative task runtime", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ./corun.toml, then the user config)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run N countdown tasks to quiescence
    Countdown {
        /// Worker threads (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of tasks
        #[arg(short, long, default_value_t = 8)]
        tasks: usize,

        /// Emit per-step trace records
        #[arg(long)]
        trace: bool,
    },

    /// Hammer a standalone queue with concurrent producers and consumers
    Stress {
        #[arg(long, default_value_t = 8)]
        producers: usize,

        #[arg(long, default_value_t = 8)]
        consumers: usize,

        /// Elements pushed (and popped) in total
        #[arg(long, default_value_t = 100_000)]
        ops: usize,

        /// Use the bounded lock-free ring instead of the locked queue
        #[arg(long)]
        lock_free: bool,

        /// Ring capacity for --lock-free
        #[arg(long, default_value_t = 1024)]
        capacity: usize,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli(args.verbose);

    match args.command {
        Commands::Countdown {
            workers,
            tasks,
            trace,
        } => {
            let mut runtime_config = config::load_config(args.config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(workers) = workers {
                runtime_config.num_workers = workers;
            }
            runtime_config.tracing |= trace;

            let report =
                run_countdown(runtime_config, tasks).context("Failed to run countdown workload")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} tasks finished, {} steps ({} expected), {} us",
                    report.finished, report.invocations, report.expected_invocations, report.elapsed_us
                );
            }
            if !report.is_complete() {
                bail!("countdown workload did not complete: {:?}", report);
            }
        }
        Commands::Stress {
            producers,
            consumers,
            ops,
            lock_free,
            capacity,
        } => {
            let kind = if lock_free {
                QueueKind::LockFree
            } else {
                QueueKind::Locked
            };
            let report = queue_stress(StressConfig {
                kind,
                capacity,
                producers,
                consumers,
                elements: ops,
            });
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} queue: {} in / {} out, {} duplicates, {} missing, nodes {}/{}, {} panicked threads, {} us",
                    report.kind,
                    report.enqueued,
                    report.dequeued,
                    report.duplicates,
                    report.missing,
                    report.nodes.allocations,
                    report.nodes.frees,
                    report.thread_panics,
                    report.elapsed_us
                );
            }
            if !report.is_clean() {
                bail!("queue stress failed: {:?}", report);
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
