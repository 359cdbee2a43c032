//! cholesky: blocked Cholesky factorization on the dataflow scheduler.
//!
//! Generates a random symmetric positive-definite matrix of
//! `matrix_size × matrix_size` blocks of `block_size × block_size`,
//! factorizes it, and reports generation, factorization and total time.
//!
//! Settings come from `TILEGRAPH_*` environment variables (and `.env`);
//! command-line flags override them.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use tilegraph_compute::cholesky;
use tilegraph_compute::report::{FileSink, JsonLinesSink, LogSink, TimingSink};
use tilegraph_compute::scheduler::{Scheduler, SchedulerConfig};
use tilegraph_core::config::{load_dotenv, Config};

// ── CLI ─────────────────────────────────────────────────────────────

/// Blocked Cholesky decomposition benchmark.
#[derive(Parser, Debug)]
#[command(name = "cholesky", version, about)]
struct Cli {
    /// Block size (rows and columns of each tile).
    #[arg(short = 'b', long)]
    block_size: Option<usize>,

    /// Matrix size in blocks per side.
    #[arg(short = 'm', long)]
    matrix_size: Option<usize>,

    /// Number of warm-up tasks submitted before generation.
    #[arg(short = 's', long)]
    sleep_tasks: Option<usize>,

    /// Threads each kernel may use internally.
    #[arg(long = "kernel-threads", visible_alias = "mkl-threads")]
    kernel_threads: Option<usize>,

    /// Graph-level workers (0 = available parallelism).
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Base seed for matrix generation.
    #[arg(long)]
    seed: Option<u64>,

    /// Scheduler TOML file; flags still take precedence.
    #[arg(long, env = "TILEGRAPH_SCHEDULER_CONFIG")]
    config: Option<PathBuf>,

    /// File receiving the total time in seconds.
    #[arg(long)]
    timing_file: Option<PathBuf>,

    /// File receiving one JSON line per run.
    #[arg(long)]
    timing_jsonl: Option<PathBuf>,

    /// Record an execution trace and check it for ordering violations.
    #[arg(long)]
    trace: bool,
}

impl Cli {
    /// Apply flags on top of the environment configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.block_size {
            config.block_size = v;
        }
        if let Some(v) = self.matrix_size {
            config.matrix_size = v;
        }
        if let Some(v) = self.sleep_tasks {
            config.warmup_tasks = v;
        }
        if let Some(v) = self.kernel_threads {
            config.kernel_threads = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(path) = &self.timing_file {
            config.timing_file = Some(path.clone());
        }
        if let Some(path) = &self.timing_jsonl {
            config.timing_jsonl = Some(path.clone());
        }
    }

    fn scheduler_config(&self, config: &Config) -> anyhow::Result<SchedulerConfig> {
        let mut sched = match &self.config {
            Some(path) => {
                let sched = SchedulerConfig::from_file(path)?;
                info!(path = %path.display(), "loaded scheduler config");
                // The file wins over the environment, flags win over the file.
                SchedulerConfig {
                    worker_threads: self.workers.unwrap_or(sched.worker_threads),
                    kernel_threads: self.kernel_threads.unwrap_or(sched.kernel_threads),
                    ..sched
                }
            }
            None => SchedulerConfig {
                worker_threads: config.workers,
                kernel_threads: config.kernel_threads,
                ..SchedulerConfig::default()
            },
        };
        sched.record_trace |= self.trace;
        Ok(sched)
    }
}

fn sinks(config: &Config) -> Vec<Box<dyn TimingSink>> {
    let mut sinks: Vec<Box<dyn TimingSink>> = vec![Box::new(LogSink)];
    if let Some(path) = &config.timing_file {
        sinks.push(Box::new(FileSink::new(path)));
    }
    if let Some(path) = &config.timing_jsonl {
        sinks.push(Box::new(JsonLinesSink::new(path)));
    }
    sinks
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    cli.apply(&mut config);
    let sched_config = cli.scheduler_config(&config)?;
    config.workers = sched_config.worker_threads;
    config.kernel_threads = sched_config.kernel_threads;
    config.validate()?;
    config.log_summary();

    let scheduler = Scheduler::new(sched_config)?;
    if scheduler.config().peak_threads() > available_threads() {
        warn!(
            peak = scheduler.config().peak_threads(),
            available = available_threads(),
            "workers × kernel threads exceeds available parallelism"
        );
    }

    let mut sinks = sinks(&config);
    let outcome = cholesky::run(&scheduler, &config, &mut sinks)?;
    info!(
        run_id = %outcome.report.run_id,
        kernels = outcome.report.kernels_executed,
        "Run complete"
    );

    if let Some(trace) = scheduler.trace()? {
        let violations = trace.ordering_violations();
        if violations.is_empty() {
            info!(edges = trace.edges.len(), "execution trace respects every dependency");
        } else {
            warn!(count = violations.len(), "execution trace has ordering violations");
        }
    }

    let metrics = scheduler.metrics();
    info!(metrics = %serde_json::to_string(&metrics)?, "scheduler metrics");

    scheduler.shutdown()?;
    Ok(())
}

fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
