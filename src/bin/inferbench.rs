use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use inferbench::backends::builtin_registry;
use inferbench::{
    parse_batch_sizes, parse_runs, run_benchmark, BenchError, BenchmarkConfig, BenchmarkModel,
    BenchmarkReport, Event, EventSink, JsonLinesSink, JsonReportSink, MonotonicClock, Phase,
    ReadLimits, ReportSink, TracingSink, DEFAULT_TOTAL_INFERENCE_RUNS,
};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EventFormat {
    /// One JSON object per line on stdout
    Json,
    /// Events as tracing records on stderr
    Log,
}

#[derive(Parser, Debug)]
#[command(
    name = "inferbench",
    about = "Benchmark an inference backend across batch sizes"
)]
struct Args {
    /// Dotted backend identifier, e.g. synthetic.dense
    #[arg(required_unless_present = "list")]
    backend: Option<String>,

    /// Comma-separated batch sizes to run, in order (e.g. 1,4,8)
    #[arg(long)]
    batch_size: Option<String>,

    /// Timed inferences per batch size
    #[arg(long)]
    runs: Option<String>,

    /// Prepare the batch artifacts, shut down, and skip all timing phases
    #[arg(long)]
    only_prepare: bool,

    /// First-read time in seconds at or above which repeated reads are skipped
    #[arg(long, default_value_t = 60.0)]
    read_ceiling_secs: f64,

    /// Approximate total seconds the repeated reads may take
    #[arg(long, default_value_t = 600)]
    read_budget_secs: u64,

    /// Upper bound on repeated reads
    #[arg(long, default_value_t = 50)]
    max_read_runs: usize,

    /// Directory for exported/compiled backend artifacts
    #[arg(long, default_value = "temp")]
    artifact_dir: PathBuf,

    /// Write the full report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// How progress events are rendered
    #[arg(long, value_enum, default_value_t = EventFormat::Json)]
    events: EventFormat,

    /// List registered backends and exit
    #[arg(long)]
    list: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    fs::create_dir_all(&args.artifact_dir).with_context(|| {
        format!(
            "failed to create artifact directory {}",
            args.artifact_dir.display()
        )
    })?;
    let registry = builtin_registry(&args.artifact_dir);

    if args.list {
        for id in registry.ids() {
            println!("{}", id);
        }
        return Ok(());
    }

    let mut events: Box<dyn EventSink> = match args.events {
        EventFormat::Json => Box::new(JsonLinesSink::new(io::stdout())),
        EventFormat::Log => Box::new(TracingSink),
    };

    let backend_id = args
        .backend
        .clone()
        .ok_or_else(|| anyhow!("a backend identifier is required"))?;

    let batch_sizes = batch_sizes_or_default(args.batch_size.as_deref(), events.as_mut());
    let runs = runs_or_default(args.runs.as_deref(), events.as_mut());

    let ceiling = Duration::try_from_secs_f64(args.read_ceiling_secs)
        .map_err(|err| anyhow!("invalid --read-ceiling-secs {}: {}", args.read_ceiling_secs, err))?;

    let config = BenchmarkConfig::try_new(batch_sizes, runs)?
        .with_prepare_only(args.only_prepare)
        .with_read_limits(ReadLimits {
            ceiling,
            budget: Duration::from_secs(args.read_budget_secs),
            max_runs: args.max_read_runs,
        })
        .with_artifact_dir(&args.artifact_dir);

    let backend = match registry.resolve(&backend_id) {
        Ok(backend) => backend,
        Err(err) => {
            events.emit(Event::error(Phase::Start, &err));
            return Err(anyhow::Error::new(err)
                .context(format!("failed to load backend {}", backend_id)));
        }
    };

    let mut model = BenchmarkModel::new(backend);
    let report = run_benchmark(
        &mut model,
        &backend_id,
        &config,
        MonotonicClock::new(),
        events.as_mut(),
    );

    if let Some(path) = &args.report {
        let mut sink = JsonReportSink::new(path);
        if let Err(err) = sink.submit(&report) {
            events.emit(Event::error(Phase::Done, &err));
        }
    }

    // Keep stdout for JSON events.
    match args.events {
        EventFormat::Json => print_summary(&report, &mut io::stderr().lock())?,
        EventFormat::Log => print_summary(&report, &mut io::stdout().lock())?,
    }

    if report.shutdown_failed() {
        bail!("backend {} failed to shut down cleanly", backend_id);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Falls back to `[1]` after reporting a bad `--batch-size`.
fn batch_sizes_or_default(raw: Option<&str>, events: &mut dyn EventSink) -> Vec<usize> {
    match raw.map(parse_batch_sizes) {
        None => vec![1],
        Some(Ok(sizes)) => sizes,
        Some(Err(err)) => {
            report_fallback(events, &err, "using default batch sizes [1]");
            vec![1]
        }
    }
}

/// Falls back to the default run count after reporting a bad `--runs`.
fn runs_or_default(raw: Option<&str>, events: &mut dyn EventSink) -> usize {
    match raw.map(parse_runs) {
        None => DEFAULT_TOTAL_INFERENCE_RUNS,
        Some(Ok(runs)) => runs,
        Some(Err(err)) => {
            report_fallback(
                events,
                &err,
                &format!("using default {} runs", DEFAULT_TOTAL_INFERENCE_RUNS),
            );
            DEFAULT_TOTAL_INFERENCE_RUNS
        }
    }
}

fn report_fallback(events: &mut dyn EventSink, err: &BenchError, fallback: &str) {
    events.emit(Event::Error {
        phase: Phase::Start,
        category: err.category(),
        message: format!("{}, {}", err, fallback),
        batch_size: None,
    });
}

fn print_summary(report: &BenchmarkReport, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Model: {} ({})", report.model, report.description)?;
    writeln!(
        out,
        "Platform: {}{}{}",
        report.platform,
        report
            .os_version
            .as_deref()
            .or(report.os_release.as_deref())
            .map(|version| format!(" ({})", version))
            .unwrap_or_default(),
        report
            .hostname
            .as_deref()
            .map(|host| format!(" on {}", host))
            .unwrap_or_default()
    )?;
    writeln!(
        out,
        "Batch sizes: {:?}, {} runs each",
        report.batch_sizes, report.total_inference_runs
    )?;
    writeln!(out, "Preparation: {:.3}s", report.preparation_seconds)?;

    if !report.prepare_only {
        let read = &report.read;
        writeln!(
            out,
            "First read: {} ms",
            format_seconds(read.first_read_seconds)
        )?;
        if read.repeats_skipped {
            writeln!(out, "Repeated reads: skipped")?;
        } else if let Some(summary) = &read.repeated.summary {
            writeln!(
                out,
                "Repeated reads ({}) ms: avg={} median={} p90={} min={} max={}",
                summary.samples,
                format_seconds(Some(summary.average)),
                format_seconds(Some(summary.median)),
                format_seconds(Some(summary.p90)),
                format_seconds(Some(summary.min)),
                format_seconds(Some(summary.max)),
            )?;
        }

        for record in report.inference.values() {
            let Some(summary) = &record.inference.summary else {
                continue;
            };
            writeln!(
                out,
                "Batch {}: warm-up={} ms, latency (ms) avg={} median={} p90={} p95={} p99={} min={} max={}",
                record.batch_size,
                format_seconds(record.warm_up_seconds),
                format_seconds(Some(summary.average)),
                format_seconds(Some(summary.median)),
                format_seconds(Some(summary.p90)),
                format_seconds(Some(summary.p95)),
                format_seconds(Some(summary.p99)),
                format_seconds(Some(summary.min)),
                format_seconds(Some(summary.max)),
            )?;
            if let Some(throughput) = &record.throughput {
                writeln!(
                    out,
                    "  throughput: {} inf/s, {} batch/s (average)",
                    format_rate(throughput.inferences_per_second.average),
                    format_rate(throughput.batches_per_second.average),
                )?;
            }
        }
    }

    writeln!(
        out,
        "Shutdown: {} ms, total {:.3}s",
        format_seconds(report.shutdown_seconds),
        report.total_seconds
    )?;

    if report.has_failures() {
        writeln!(out, "Failures: {}", report.failures.len())?;
        for failure in &report.failures {
            let batch = failure
                .batch_size
                .map(|size| format!(" batch {}", size))
                .unwrap_or_default();
            writeln!(
                out,
                "  [{}] {}{}: {}",
                failure.category, failure.phase, batch, failure.message
            )?;
        }
    }

    Ok(())
}

fn format_seconds(seconds: Option<f64>) -> String {
    match seconds {
        Some(value) => format!("{:.2}", value * 1000.0),
        None => "n/a".to_string(),
    }
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(value) => format!("{:.2}", value),
        None => "n/a".to_string(),
    }
}
