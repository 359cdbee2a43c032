use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

/// Run configuration for the blocked factorization workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Rows/columns per block (`BSIZE`).
    pub block_size: usize,
    /// Blocks per matrix side (`MSIZE`).
    pub matrix_size: usize,
    /// Thread budget of each running kernel.
    pub kernel_threads: usize,
    /// Graph-level workers. 0 = available parallelism.
    pub workers: usize,
    /// Sleep tasks submitted (and drained) before generation.
    pub warmup_tasks: usize,
    /// Base seed for block generation.
    pub seed: u64,
    /// File receiving the total elapsed seconds.
    pub timing_file: Option<PathBuf>,
    /// JSON-lines file receiving one record per run.
    pub timing_jsonl: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            block_size: 1024,
            matrix_size: 6,
            kernel_threads: 1,
            workers: 0,
            warmup_tasks: 0,
            seed: 0,
            timing_file: Some(PathBuf::from("execution_time.txt")),
            timing_jsonl: None,
        }
    }
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TILEGRAPH_PROFILE`. When set (e.g. `BENCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TILEGRAPH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let defaults = Self::default();
        Self {
            profile: p.to_string(),
            block_size: profiled_env_parse(p, "TILEGRAPH_BLOCK_SIZE", defaults.block_size),
            matrix_size: profiled_env_parse(p, "TILEGRAPH_MATRIX_SIZE", defaults.matrix_size),
            kernel_threads: profiled_env_parse(p, "TILEGRAPH_KERNEL_THREADS", defaults.kernel_threads),
            workers: profiled_env_parse(p, "TILEGRAPH_WORKERS", defaults.workers),
            warmup_tasks: profiled_env_parse(p, "TILEGRAPH_WARMUP_TASKS", defaults.warmup_tasks),
            seed: profiled_env_parse(p, "TILEGRAPH_SEED", defaults.seed),
            timing_file: Some(PathBuf::from(profiled_env_or(
                p,
                "TILEGRAPH_TIMING_FILE",
                "execution_time.txt",
            ))),
            timing_jsonl: profiled_env_opt(p, "TILEGRAPH_TIMING_JSONL").map(PathBuf::from),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject sizes the engine cannot work with.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.block_size == 0 {
            return Err(FlowError::InvalidConfig("block_size must be positive".into()));
        }
        if self.matrix_size == 0 {
            return Err(FlowError::InvalidConfig("matrix_size must be positive".into()));
        }
        if self.kernel_threads == 0 {
            return Err(FlowError::InvalidConfig("kernel_threads must be positive".into()));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  matrix:   {} x {} blocks of {} x {}", self.matrix_size, self.matrix_size, self.block_size, self.block_size);
        tracing::info!("  threads:  workers={} (0 = auto), kernel_threads={}", self.workers, self.kernel_threads);
        tracing::info!("  warmup:   {} tasks", self.warmup_tasks);
        tracing::info!("  seed:     {}", self.seed);
        tracing::info!(
            "  timing:   file={}, jsonl={}",
            self.timing_file.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none)".into()),
            self.timing_jsonl.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none)".into()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let config = Config::default();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.matrix_size, 6);
        assert_eq!(config.kernel_threads, 1);
        assert_eq!(config.workers, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        // Keys unique to this test so parallel tests never observe them.
        env::set_var("CFGTEST_TILEGRAPH_MATRIX_SIZE", "9");
        env::set_var("TILEGRAPH_CFGTEST_ONLY", "4");
        assert_eq!(profiled_env_parse("CFGTEST", "TILEGRAPH_MATRIX_SIZE", 6usize), 9);
        assert_eq!(profiled_env_parse("CFGTEST", "TILEGRAPH_CFGTEST_ONLY", 1usize), 4);
        assert_eq!(profiled_env_parse("CFGTEST", "TILEGRAPH_CFGTEST_MISSING", 1usize), 1);
        env::remove_var("CFGTEST_TILEGRAPH_MATRIX_SIZE");
        env::remove_var("TILEGRAPH_CFGTEST_ONLY");
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let mut config = Config::default();
        config.block_size = 0;
        assert!(matches!(config.validate(), Err(FlowError::InvalidConfig(_))));

        let mut config = Config::default();
        config.kernel_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn profile_label_defaults() {
        assert_eq!(Config::default().profile_label(), "default");
    }
}
