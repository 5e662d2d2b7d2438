//! Backend that blocks for fixed, configurable times instead of computing.
//! Useful for exercising the harness end to end without a runtime.

use std::thread;
use std::time::Duration;

use crate::error::{BenchError, Result};
use crate::model::Backend;

#[derive(Debug, Clone, PartialEq)]
pub struct SleepTimings {
    pub read: Duration,
    /// Inference time for one sample; a call blocks for `batch_size` times this.
    pub per_sample: Duration,
}

impl Default for SleepTimings {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(20),
            per_sample: Duration::from_millis(2),
        }
    }
}

pub struct SleepBackend {
    timings: SleepTimings,
    description: String,
    loaded: Option<usize>,
    prepared: Option<usize>,
}

impl SleepBackend {
    pub fn new(timings: SleepTimings) -> Self {
        let description = format!(
            "Simulated backend ({:?} read, {:?} per sample)",
            timings.read, timings.per_sample
        );
        Self {
            timings,
            description,
            loaded: None,
            prepared: None,
        }
    }
}

impl Backend for SleepBackend {
    fn description(&self) -> &str {
        &self.description
    }

    fn prepare_batch(&mut self, _batch_size: usize) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, batch_size: usize) -> Result<()> {
        thread::sleep(self.timings.read);
        self.loaded = Some(batch_size);
        Ok(())
    }

    fn prepare(&mut self, batch_size: usize) -> Result<()> {
        self.prepared = Some(batch_size);
        Ok(())
    }

    fn infer(&mut self) -> Result<()> {
        match (self.loaded, self.prepared) {
            (Some(loaded), Some(prepared)) if loaded == prepared => {
                let samples = u32::try_from(prepared).unwrap_or(u32::MAX);
                thread::sleep(self.timings.per_sample.saturating_mul(samples));
                Ok(())
            }
            (None, _) => Err(BenchError::backend("infer called before read")),
            _ => Err(BenchError::backend(
                "prepared input does not match the loaded batch size",
            )),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.loaded = None;
        self.prepared = None;
        Ok(())
    }
}
