//! Blocked Cholesky factorization over the dataflow scheduler.
//!
//! [`cholesky_blocked`] only submits kernels; ordering between them comes
//! entirely from the scheduler's hazard tracking. [`run`] drives a timed
//! run: warm-up, generation, factorization, then reports to the sinks.

use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tilegraph_core::{Block, Config, FlowError};
use tracing::info;
use uuid::Uuid;

use crate::matrix::BlockMatrix;
use crate::report::{PhaseTimings, ReportError, RunReport, TimingSink};
use crate::scheduler::{Kernel, Scheduler};

/// Group the warm-up sleep nodes are submitted under.
pub const WARMUP_GROUP: &str = "warmup";

/// Length of each warm-up sleep node.
pub const WARMUP_DURATION: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("timing report failed: {0}")]
    Report(#[from] ReportError),
}

/// Submit the factorization of `a` in place. Returns once every kernel is
/// submitted; call [`Scheduler::barrier`] to wait for the result.
///
/// On success the lower triangle of `a` holds `L` with `L·Lᵗ = A` and the
/// strict upper triangle holds zero blocks.
pub fn cholesky_blocked(scheduler: &Scheduler, a: &mut BlockMatrix) -> Result<(), FlowError> {
    let n = a.msize();
    for k in 0..n {
        let diag = scheduler.potrf(a.get(k, k))?;
        a.set(k, k, diag);

        for i in (k + 1)..n {
            let panel = scheduler.trsm(a.get(k, k), a.get(i, k))?;
            a.set(i, k, panel);
            let zero = a.zero_block();
            a.set(k, i, zero);
        }

        for i in (k + 1)..n {
            for j in i..n {
                let updated = scheduler.gemm(-1.0, a.get(j, k), a.get(i, k), a.get(j, i), 1.0)?;
                a.set(j, i, updated);
            }
        }
    }
    Ok(())
}

/// Factorize a dense matrix tile by tile and return the dense lower factor.
pub fn factorize(scheduler: &Scheduler, a: &Block, bsize: usize) -> Result<Block, FlowError> {
    let mut grid = BlockMatrix::from_dense(a, bsize).ok_or_else(|| {
        FlowError::InvalidConfig(format!(
            "block size {} does not divide matrix dimension {}",
            bsize,
            a.dim()
        ))
    })?;
    cholesky_blocked(scheduler, &mut grid)?;
    scheduler.barrier()?;
    grid.assemble(scheduler)
}

/// Result of a timed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub factor: BlockMatrix,
}

/// Timed run with the sizes and seed from `config`.
///
/// Each phase ends with a barrier, so a failing kernel aborts the run at
/// the end of its phase. Sinks are only called for completed runs.
pub fn run(
    scheduler: &Scheduler,
    config: &Config,
    sinks: &mut [Box<dyn TimingSink>],
) -> Result<RunOutcome, RunError> {
    if config.warmup_tasks > 0 {
        info!(tasks = config.warmup_tasks, "Submitting warm-up tasks");
        for _ in 0..config.warmup_tasks {
            scheduler.submit_in(WARMUP_GROUP, Kernel::Warmup { duration: WARMUP_DURATION }, &[])?;
        }
        scheduler.barrier_group(WARMUP_GROUP)?;
    }
    scheduler.barrier()?;

    info!(
        msize = config.matrix_size,
        bsize = config.block_size,
        "Generating matrix"
    );
    let start = Instant::now();
    let mut matrix = BlockMatrix::generate_spd(
        scheduler,
        config.matrix_size,
        config.block_size,
        config.seed,
    )?;
    scheduler.barrier()?;
    let init = start.elapsed();
    info!("  Generation done in {:.3}s", init.as_secs_f64());

    info!("Factorizing");
    let start = Instant::now();
    cholesky_blocked(scheduler, &mut matrix)?;
    scheduler.barrier()?;
    let decomposition = start.elapsed();
    info!("  Factorization done in {:.3}s", decomposition.as_secs_f64());

    let report = RunReport {
        run_id: Uuid::new_v4(),
        recorded_at: Utc::now(),
        block_size: config.block_size,
        matrix_size: config.matrix_size,
        workers: scheduler.worker_count(),
        kernel_threads: scheduler.config().kernel_threads,
        warmup_tasks: config.warmup_tasks,
        kernels_executed: scheduler.metrics().total_executed(),
        timings: PhaseTimings::new(init, decomposition),
    };
    for sink in sinks.iter_mut() {
        sink.record(&report)?;
    }

    Ok(RunOutcome {
        report,
        factor: matrix,
    })
}

/// Kernel counts submitted by [`cholesky_blocked`] on an `n × n` grid:
/// `(potrf, trsm, gemm)`.
pub fn kernel_counts(n: usize) -> (usize, usize, usize) {
    let potrf = n;
    let trsm = n * n.saturating_sub(1) / 2;
    let gemm = (0..n).map(|k| {
        let m = n - k - 1;
        m * (m + 1) / 2
    });
    (potrf, trsm, gemm.sum())
}
