//! Phase timings of a run and the sinks they are reported to.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wall-clock time of each phase. Serialized as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PhaseTimings {
    #[serde(serialize_with = "as_secs")]
    pub init: Duration,
    #[serde(serialize_with = "as_secs")]
    pub decomposition: Duration,
    #[serde(serialize_with = "as_secs")]
    pub total: Duration,
}

impl PhaseTimings {
    pub fn new(init: Duration, decomposition: Duration) -> Self {
        Self {
            init,
            decomposition,
            total: init + decomposition,
        }
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// One run's timings plus the parameters it ran with.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub block_size: usize,
    pub matrix_size: usize,
    pub workers: usize,
    pub kernel_threads: usize,
    pub warmup_tasks: usize,
    pub kernels_executed: u64,
    pub timings: PhaseTimings,
}

/// Destination for run reports.
pub trait TimingSink {
    fn record(&mut self, report: &RunReport) -> Result<(), ReportError>;
}

/// Logs the elapsed-times banner.
#[derive(Debug, Default)]
pub struct LogSink;

impl TimingSink for LogSink {
    fn record(&mut self, report: &RunReport) -> Result<(), ReportError> {
        let t = &report.timings;
        info!("---------- Elapsed Times ----------");
        info!("initT:{}", t.init.as_secs_f64());
        info!("decompT:{}", t.decomposition.as_secs_f64());
        info!("totalTime:{}", t.total.as_secs_f64());
        info!("-----------------------------------");
        Ok(())
    }
}

/// Overwrites a file with the total time in seconds.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TimingSink for FileSink {
    fn record(&mut self, report: &RunReport) -> Result<(), ReportError> {
        fs::write(&self.path, report.timings.total.as_secs_f64().to_string())?;
        info!(path = %self.path.display(), "total time written");
        Ok(())
    }
}

/// Appends each report as one JSON line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TimingSink for JsonLinesSink {
    fn record(&mut self, report: &RunReport) -> Result<(), ReportError> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
