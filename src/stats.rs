//! Descriptive statistics over duration series.
//!
//! Percentiles use the inclusive method (rank = 1 + p * (n - 1), linear
//! interpolation between the closest ranks), so p0 is the minimum and p100 the
//! maximum. Throughput figures are derived from the time statistics rather
//! than measured separately.

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Immutable snapshot of a duration series, all values in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub average: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

impl Summary {
    pub fn from_series(series: &[f64]) -> Result<Self> {
        if series.is_empty() {
            return Err(BenchError::InsufficientData(
                "cannot summarize an empty duration series".to_string(),
            ));
        }

        let mut sorted = series.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let (min, max) = (sorted[0], sorted[n - 1]);
        // Rounding in the sum can push the mean just outside the sample range.
        let average = (sorted.iter().sum::<f64>() / n as f64).max(min).min(max);

        Ok(Self {
            average,
            median: percentile_inclusive(&sorted, 0.50)?,
            p90: percentile_inclusive(&sorted, 0.90)?,
            p95: percentile_inclusive(&sorted, 0.95)?,
            p99: percentile_inclusive(&sorted, 0.99)?,
            min,
            max,
            samples: n,
        })
    }

    /// Throughput at the given batch size for each of the central statistics.
    pub fn throughput(&self, batch_size: usize) -> Throughput {
        let inferences_per_second = Rates {
            average: per_second(self.average),
            median: per_second(self.median),
            p90: per_second(self.p90),
            p95: per_second(self.p95),
            p99: per_second(self.p99),
        };
        let batches_per_second = inferences_per_second.scaled(batch_size as f64);
        Throughput {
            inferences_per_second,
            batches_per_second,
        }
    }
}

/// Rates derived from the time statistics. A statistic of zero seconds has no
/// defined rate and is left as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rates {
    pub average: Option<f64>,
    pub median: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl Rates {
    fn scaled(&self, factor: f64) -> Self {
        let scale = |rate: Option<f64>| rate.map(|value| value * factor);
        Self {
            average: scale(self.average),
            median: scale(self.median),
            p90: scale(self.p90),
            p95: scale(self.p95),
            p99: scale(self.p99),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Throughput {
    pub inferences_per_second: Rates,
    pub batches_per_second: Rates,
}

fn per_second(seconds: f64) -> Option<f64> {
    if seconds > 0.0 && seconds.is_finite() {
        Some(1.0 / seconds)
    } else {
        None
    }
}

/// Inclusive percentile of an ascending slice. `quantile` is clamped to
/// `[0, 1]`. An empty slice is [`BenchError::InsufficientData`].
pub fn percentile_inclusive(sorted: &[f64], quantile: f64) -> Result<f64> {
    let Some(last) = sorted.len().checked_sub(1) else {
        return Err(BenchError::InsufficientData(
            "cannot take a percentile of an empty duration series".to_string(),
        ));
    };
    let rank = quantile.clamp(0.0, 1.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = (rank.ceil() as usize).min(last);
    let fraction = rank - lower as f64;
    let (low, high) = (sorted[lower], sorted[upper]);
    Ok((low + fraction * (high - low)).max(low).min(high))
}
