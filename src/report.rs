use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{System, SystemExt};

use crate::error::{ErrorCategory, Result};
use crate::events::Phase;
use crate::stats::{Summary, Throughput};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub phase: Phase,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    pub message: String,
}

/// Raw durations of one timed phase and their summary. `summary` is absent
/// when the series is empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub durations: Vec<f64>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReadRecord {
    pub batch_size: Option<usize>,
    pub first_read_seconds: Option<f64>,
    /// The cold read as a one-sample series, present even when repeats are
    /// skipped.
    pub first_read: PhaseTimings,
    /// True when the first read hit the ceiling and no repeats were run.
    pub repeats_skipped: bool,
    pub repeat_count: usize,
    pub repeated: PhaseTimings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub batch_size: usize,
    /// Combined read and warm-up time of the load that served this batch size.
    /// Absent when loading failed before the record was first written.
    pub warm_up_seconds: Option<f64>,
    pub inference: PhaseTimings,
    pub throughput: Option<Throughput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub model: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub platform: String,
    /// Kernel release, e.g. `6.1.0-18-amd64`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_release: Option<String>,
    /// Distribution or OS version string, e.g. `Linux 12 Debian GNU/Linux`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Every batch size requested, in order, duplicates included.
    pub batch_sizes: Vec<usize>,
    pub total_inference_runs: usize,
    pub prepare_only: bool,
    pub preparation_seconds: f64,
    pub read: ReadRecord,
    pub inference: BTreeMap<usize, BatchRecord>,
    pub shutdown_seconds: Option<f64>,
    pub total_seconds: f64,
    pub failures: Vec<FailureRecord>,
}

impl BenchmarkReport {
    pub fn new(model: impl Into<String>, description: impl Into<String>) -> Self {
        let system = System::new();
        Self {
            model: model.into(),
            description: description.into(),
            hostname: detect_hostname(),
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            os_release: system.kernel_version(),
            os_version: system.long_os_version(),
            started_at: Utc::now(),
            batch_sizes: Vec::new(),
            total_inference_runs: 0,
            prepare_only: false,
            preparation_seconds: 0.0,
            read: ReadRecord::default(),
            inference: BTreeMap::new(),
            shutdown_seconds: None,
            total_seconds: 0.0,
            failures: Vec::new(),
        }
    }

    pub fn batch(&self, batch_size: usize) -> Option<&BatchRecord> {
        self.inference.get(&batch_size)
    }

    pub fn warm_up_seconds(&self) -> BTreeMap<usize, f64> {
        self.inference
            .values()
            .filter_map(|record| record.warm_up_seconds.map(|secs| (record.batch_size, secs)))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// True when the final shutdown failed.
    pub fn shutdown_failed(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.phase == Phase::Shutdown)
    }
}

fn detect_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Consumer of finished (or partial) reports.
pub trait ReportSink {
    fn submit(&mut self, report: &BenchmarkReport) -> Result<()>;
}

/// Writes the report as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn submit(&mut self, report: &BenchmarkReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report).map_err(std::io::Error::from)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_report() -> BenchmarkReport {
        let mut report = BenchmarkReport::new("synthetic.dense", "dense layer");
        report.batch_sizes = vec![1, 4];
        let durations = vec![0.5, 0.5];
        let summary = Summary::from_series(&durations).unwrap();
        report.inference.insert(
            4,
            BatchRecord {
                batch_size: 4,
                warm_up_seconds: Some(1.25),
                inference: PhaseTimings {
                    durations,
                    summary: Some(summary),
                },
                throughput: Some(summary.throughput(4)),
            },
        );
        report.failures.push(FailureRecord {
            phase: Phase::BatchPreparation,
            category: ErrorCategory::Preparation,
            batch_size: Some(1),
            message: "missing source".to_string(),
        });
        report
    }

    #[test]
    fn json_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let mut sink = JsonReportSink::new(&path);
        sink.submit(&sample_report()).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["model"], "synthetic.dense");
        assert_eq!(value["batch_sizes"], serde_json::json!([1, 4]));
        assert_eq!(value["inference"]["4"]["warm_up_seconds"], 1.25);
        assert_eq!(
            value["inference"]["4"]["throughput"]["batches_per_second"]["average"],
            8.0
        );
        assert_eq!(value["failures"][0]["category"], "preparation");
    }

    #[test]
    fn header_describes_the_host() {
        let report = BenchmarkReport::new("synthetic.sleep", "sleep");
        assert!(report.platform.starts_with(std::env::consts::OS));
        assert!(report.platform.ends_with(std::env::consts::ARCH));
        if let Some(hostname) = &report.hostname {
            assert_eq!(hostname.trim(), hostname);
            assert!(!hostname.is_empty());
        }

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["platform"], report.platform.as_str());
        assert_eq!(value.get("os_release").is_some(), report.os_release.is_some());
    }

    #[test]
    fn warm_up_map_and_failure_flags() {
        let report = sample_report();
        assert_eq!(report.warm_up_seconds().get(&4), Some(&1.25));
        assert!(report.batch(1).is_none());
        assert!(report.has_failures());
        assert!(!report.shutdown_failed());
    }
}
