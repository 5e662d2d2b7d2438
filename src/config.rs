use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BenchError, Result};
use crate::model::DEFAULT_TOTAL_INFERENCE_RUNS;

pub const DEFAULT_BATCH_SIZES: [usize; 1] = [1];
pub const DEFAULT_READ_CEILING: Duration = Duration::from_secs(60);
pub const DEFAULT_READ_BUDGET: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_READ_RUNS: usize = 50;
pub const DEFAULT_ARTIFACT_DIR: &str = "temp";

/// Limits for the repeated-read phase.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadLimits {
    /// A first read at or above this skips repeated reads entirely.
    pub ceiling: Duration,
    /// Approximate wall time the repeated reads may take in total.
    pub budget: Duration,
    pub max_runs: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_READ_CEILING,
            budget: DEFAULT_READ_BUDGET,
            max_runs: DEFAULT_MAX_READ_RUNS,
        }
    }
}

impl ReadLimits {
    /// `None` when the first read reached the ceiling and repeated reads are
    /// skipped. Otherwise `min(max_runs, budget / max(first_read, 1))` with
    /// whole seconds and floor division, which may be zero.
    pub fn repeat_count(&self, first_read: Duration) -> Option<usize> {
        if first_read >= self.ceiling {
            return None;
        }
        let divisor = first_read.as_secs().max(1);
        let by_budget = self.budget.as_secs() / divisor;
        Some(self.max_runs.min(usize::try_from(by_budget).unwrap_or(usize::MAX)))
    }
}

#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub batch_sizes: Vec<usize>,
    pub total_inference_runs: usize,
    /// Run batch preparation and shutdown only.
    pub prepare_only: bool,
    pub read_limits: ReadLimits,
    pub artifact_dir: PathBuf,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            batch_sizes: DEFAULT_BATCH_SIZES.to_vec(),
            total_inference_runs: DEFAULT_TOTAL_INFERENCE_RUNS,
            prepare_only: false,
            read_limits: ReadLimits::default(),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
        }
    }
}

impl BenchmarkConfig {
    pub fn try_new(batch_sizes: Vec<usize>, total_inference_runs: usize) -> Result<Self> {
        if batch_sizes.is_empty() {
            return Err(BenchError::Configuration(
                "at least one batch size is required".to_string(),
            ));
        }
        if let Some(zero_at) = batch_sizes.iter().position(|&size| size == 0) {
            return Err(BenchError::Configuration(format!(
                "batch size at position {} must be greater than zero",
                zero_at + 1
            )));
        }
        if total_inference_runs == 0 {
            return Err(BenchError::Configuration(
                "total inference runs must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            batch_sizes,
            total_inference_runs,
            ..Self::default()
        })
    }

    pub fn with_prepare_only(mut self, prepare_only: bool) -> Self {
        self.prepare_only = prepare_only;
        self
    }

    pub fn with_read_limits(mut self, read_limits: ReadLimits) -> Self {
        self.read_limits = read_limits;
        self
    }

    pub fn with_artifact_dir(mut self, artifact_dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = artifact_dir.into();
        self
    }
}

/// Parses a comma-separated batch size list such as `1,4,8`. Order and
/// duplicates are kept.
pub fn parse_batch_sizes(raw: &str) -> Result<Vec<usize>> {
    let sizes = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<usize>() {
            Ok(0) => Err(BenchError::Configuration(
                "batch size must be greater than zero".to_string(),
            )),
            Ok(size) => Ok(size),
            Err(err) => Err(BenchError::Configuration(format!(
                "invalid batch size '{}': {}",
                part, err
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    if sizes.is_empty() {
        return Err(BenchError::Configuration(format!(
            "no batch sizes found in '{}'",
            raw
        )));
    }
    Ok(sizes)
}

/// Parses a timed inference run count. Zero and non-numeric text are
/// configuration errors.
pub fn parse_runs(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(BenchError::Configuration(
            "runs must be greater than zero".to_string(),
        )),
        Ok(runs) => Ok(runs),
        Err(err) => Err(BenchError::Configuration(format!(
            "invalid runs '{}': {}",
            raw, err
        ))),
    }
}
