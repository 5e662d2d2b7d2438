pub mod backends;
mod config;
mod error;
mod events;
mod model;
mod registry;
mod report;
mod runner;
mod stats;
mod timer;

pub use config::{parse_batch_sizes, parse_runs, BenchmarkConfig, ReadLimits};
pub use error::{BenchError, ErrorCategory, Result};
pub use events::{Event, EventSink, JsonLinesSink, MemorySink, Phase, TracingSink};
pub use model::{Backend, BenchmarkModel, DEFAULT_TOTAL_INFERENCE_RUNS};
pub use registry::BackendRegistry;
pub use report::{
    BatchRecord, BenchmarkReport, FailureRecord, JsonReportSink, PhaseTimings, ReadRecord,
    ReportSink,
};
pub use runner::run_benchmark;
pub use stats::{percentile_inclusive, Rates, Summary, Throughput};
pub use timer::{CheckpointRecorder, Clock, ManualClock, MonotonicClock};
