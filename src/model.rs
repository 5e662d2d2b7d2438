//! The lifecycle every backend under test goes through.
//!
//! A [`Backend`] implements the runtime-specific capability set. The
//! [`BenchmarkModel`] wrapper owns the per-run state (active batch size and
//! the inference-run counter) and is driven exclusively by the runner.

use crate::error::{BenchError, Result};

pub const DEFAULT_TOTAL_INFERENCE_RUNS: usize = 100;

/// Capability set of one runtime/execution-provider combination.
///
/// Every method may block for as long as the device needs; that time is what
/// gets measured.
pub trait Backend {
    /// Human-readable label for reports.
    fn description(&self) -> &str;

    /// Makes sure the artifact for `batch_size` exists. Must be a no-op when it
    /// already does.
    fn prepare_batch(&mut self, batch_size: usize) -> Result<()>;

    /// Loads a runnable model for `batch_size`. Each call loads afresh.
    fn read(&mut self, batch_size: usize) -> Result<()>;

    /// Generates synthetic input sized to `batch_size`.
    fn prepare(&mut self, batch_size: usize) -> Result<()>;

    /// Runs one inference on the last prepared input. Output is discarded.
    fn infer(&mut self) -> Result<()>;

    /// Releases runtime resources. Safe to call when nothing is loaded and
    /// safe to call repeatedly.
    fn shutdown(&mut self) -> Result<()>;
}

pub struct BenchmarkModel {
    backend: Box<dyn Backend>,
    batch_size: Option<usize>,
    total_inference_runs: usize,
    current_inference_run: usize,
}

impl BenchmarkModel {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            batch_size: None,
            total_inference_runs: DEFAULT_TOTAL_INFERENCE_RUNS,
            current_inference_run: 0,
        }
    }

    pub fn with_total_inference_runs(mut self, total_inference_runs: usize) -> Self {
        self.set_total_inference_runs(total_inference_runs);
        self
    }

    pub fn set_total_inference_runs(&mut self, total_inference_runs: usize) {
        self.total_inference_runs = total_inference_runs;
        self.current_inference_run = self.current_inference_run.min(total_inference_runs);
    }

    pub fn description(&self) -> &str {
        self.backend.description()
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = Some(batch_size);
    }

    /// Forgets the active batch size so the next batch reloads the model.
    pub fn clear_batch_size(&mut self) {
        self.batch_size = None;
    }

    pub fn total_inference_runs(&self) -> usize {
        self.total_inference_runs
    }

    pub fn current_inference_run(&self) -> usize {
        self.current_inference_run
    }

    pub fn prepare_batch(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(BenchError::Configuration(
                "batch size must be greater than zero".to_string(),
            ));
        }
        self.backend.prepare_batch(batch_size)
    }

    pub fn reset_inference_run(&mut self) {
        self.current_inference_run = 0;
    }

    /// Loop predicate for the timed inference loop: true exactly
    /// `total_inference_runs` times after a reset, then false until the next
    /// reset.
    pub fn next_inference_run(&mut self) -> bool {
        if self.current_inference_run >= self.total_inference_runs {
            return false;
        }
        self.current_inference_run += 1;
        true
    }

    pub fn read(&mut self) -> Result<()> {
        let batch_size = self.active_batch("read")?;
        self.backend.read(batch_size)
    }

    /// Prepares input and runs one untimed inference.
    pub fn warm_up(&mut self) -> Result<()> {
        self.prepare()?;
        self.infer()
    }

    pub fn prepare(&mut self) -> Result<()> {
        let batch_size = self.active_batch("prepare")?;
        self.backend.prepare(batch_size)
    }

    pub fn infer(&mut self) -> Result<()> {
        self.active_batch("infer")?;
        self.backend.infer()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.backend.shutdown()
    }

    fn active_batch(&self, operation: &str) -> Result<usize> {
        self.batch_size.ok_or_else(|| {
            BenchError::backend(format!("{} called before a batch size was selected", operation))
        })
    }
}

impl std::fmt::Debug for BenchmarkModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkModel")
            .field("description", &self.description())
            .field("batch_size", &self.batch_size)
            .field("total_inference_runs", &self.total_inference_runs)
            .field("current_inference_run", &self.current_inference_run)
            .finish()
    }
}
