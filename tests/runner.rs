//! End-to-end runs of the orchestrator against a scripted backend.
//!
//! The backend advances a shared `ManualClock` by fixed amounts, so every
//! recorded duration is known in advance.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use inferbench::{
    run_benchmark, Backend, BenchError, BenchmarkConfig, BenchmarkModel, BenchmarkReport,
    ErrorCategory, Event, ManualClock, MemorySink, Phase, ReadLimits, Result,
};

#[derive(Default)]
struct Script {
    read_secs: f64,
    warm_up_secs: f64,
    infer_secs: BTreeMap<usize, f64>,
    fail_prepare: BTreeSet<usize>,
    fail_read_call: Option<usize>,
    fail_infer: Option<(usize, usize)>,
    fail_shutdown_call: Option<usize>,
}

#[derive(Default)]
struct Log {
    calls: Vec<String>,
    reads: usize,
    infers: usize,
    shutdowns: usize,
}

struct ScriptedBackend {
    clock: ManualClock,
    script: Script,
    log: Rc<RefCell<Log>>,
    loaded: Option<usize>,
    warmed: bool,
    batch_infers: usize,
}

impl ScriptedBackend {
    fn new(clock: &ManualClock, script: Script) -> (Self, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let backend = Self {
            clock: clock.clone(),
            script,
            log: Rc::clone(&log),
            loaded: None,
            warmed: false,
            batch_infers: 0,
        };
        (backend, log)
    }
}

impl Backend for ScriptedBackend {
    fn description(&self) -> &str {
        "scripted backend"
    }

    fn prepare_batch(&mut self, batch_size: usize) -> Result<()> {
        self.log
            .borrow_mut()
            .calls
            .push(format!("prepare_batch {}", batch_size));
        self.clock.advance_secs(0.5);
        if self.script.fail_prepare.contains(&batch_size) {
            return Err(BenchError::preparation(batch_size, "source asset missing"));
        }
        Ok(())
    }

    fn read(&mut self, batch_size: usize) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.reads += 1;
        log.calls.push(format!("read {}", batch_size));
        if self.script.fail_read_call == Some(log.reads) {
            return Err(BenchError::backend("session creation failed"));
        }
        self.clock.advance_secs(self.script.read_secs);
        self.loaded = Some(batch_size);
        self.warmed = false;
        self.batch_infers = 0;
        Ok(())
    }

    fn prepare(&mut self, batch_size: usize) -> Result<()> {
        self.log
            .borrow_mut()
            .calls
            .push(format!("prepare {}", batch_size));
        Ok(())
    }

    fn infer(&mut self) -> Result<()> {
        let batch_size = self
            .loaded
            .ok_or_else(|| BenchError::backend("nothing loaded"))?;
        let mut log = self.log.borrow_mut();
        log.infers += 1;
        log.calls.push(format!("infer {}", batch_size));

        if !self.warmed {
            self.warmed = true;
            self.clock.advance_secs(self.script.warm_up_secs);
            return Ok(());
        }

        self.batch_infers += 1;
        if self.script.fail_infer == Some((batch_size, self.batch_infers)) {
            return Err(BenchError::backend("device lost"));
        }
        let secs = self.script.infer_secs.get(&batch_size).copied().unwrap_or(0.01);
        self.clock.advance_secs(secs);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.shutdowns += 1;
        log.calls.push("shutdown".to_string());
        self.loaded = None;
        if self.script.fail_shutdown_call == Some(log.shutdowns) {
            return Err(BenchError::backend("device busy"));
        }
        self.clock.advance_secs(0.25);
        Ok(())
    }
}

fn run(
    script: Script,
    batch_sizes: Vec<usize>,
    runs: usize,
) -> (BenchmarkReport, MemorySink, Rc<RefCell<Log>>) {
    let config = BenchmarkConfig::try_new(batch_sizes, runs).unwrap();
    run_with(script, config)
}

fn run_with(
    script: Script,
    config: BenchmarkConfig,
) -> (BenchmarkReport, MemorySink, Rc<RefCell<Log>>) {
    let clock = ManualClock::new();
    let (backend, log) = ScriptedBackend::new(&clock, script);
    let mut model = BenchmarkModel::new(Box::new(backend));
    let mut events = MemorySink::new();
    let report = run_benchmark(&mut model, "scripted.test", &config, clock, &mut events);
    (report, events, log)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn full_run_records_every_phase() {
    let script = Script {
        read_secs: 2.0,
        warm_up_secs: 1.0,
        infer_secs: BTreeMap::from([(1, 0.01), (4, 0.03)]),
        ..Script::default()
    };
    let (report, events, log) = run(script, vec![1, 4], 5);

    assert_eq!(report.model, "scripted.test");
    assert_eq!(report.description, "scripted backend");
    assert_eq!(report.batch_sizes, vec![1, 4]);
    assert!(close(report.preparation_seconds, 1.0));
    assert!(report.failures.is_empty());

    // 600 / 2 = 300, capped at 50.
    assert_eq!(report.read.batch_size, Some(1));
    assert!(close(report.read.first_read_seconds.unwrap(), 2.0));
    assert_eq!(report.read.repeat_count, 50);
    assert_eq!(report.read.repeated.durations.len(), 50);
    assert_eq!(report.read.first_read.durations, vec![2.0]);
    let read_summary = report.read.repeated.summary.unwrap();
    assert!(close(read_summary.average, 2.0));
    assert!(close(read_summary.max, 2.0));

    for (batch_size, secs) in [(1, 0.01), (4, 0.03)] {
        let record = report.batch(batch_size).unwrap();
        assert_eq!(record.inference.durations.len(), 5);
        assert!(record.inference.durations.iter().all(|d| close(*d, secs)));
        let summary = record.inference.summary.unwrap();
        assert!(close(summary.median, secs));
        assert!(close(record.warm_up_seconds.unwrap(), 3.0));

        let throughput = record.throughput.unwrap();
        let ips = throughput.inferences_per_second.average.unwrap();
        assert!(close(ips, 1.0 / secs));
        let bps = throughput.batches_per_second.average.unwrap();
        assert!(close(bps, batch_size as f64 / secs));
    }

    // first read + 50 repeats + one load per batch size
    let log = log.borrow();
    assert_eq!(log.reads, 53);
    // one warm-up plus five timed inferences per batch size
    assert_eq!(log.infers, 12);
    // one before each load plus the final one
    assert_eq!(log.shutdowns, 3);
    assert_eq!(log.calls.last().map(String::as_str), Some("shutdown"));
    assert_eq!(report.shutdown_seconds, Some(0.25));

    assert_eq!(events.errors().count(), 0);
    assert_eq!(events.events.first().map(Event::phase), Some(Phase::Start));
    assert_eq!(events.events.last().map(Event::phase), Some(Phase::Done));
    let phases: BTreeSet<String> = events.events.iter().map(|e| e.phase().to_string()).collect();
    for phase in [
        "batch_preparation",
        "first_read",
        "repeated_read",
        "warm_up",
        "timed_inference",
        "shutdown",
    ] {
        assert!(phases.contains(phase), "missing {} events", phase);
    }
    assert_eq!(events.metric("read_runs"), Some(50.0));
}

#[test]
fn loop_calls_follow_lifecycle_order() {
    let script = Script {
        read_secs: 1.0,
        ..Script::default()
    };
    let config = BenchmarkConfig::try_new(vec![2], 2)
        .unwrap()
        .with_read_limits(ReadLimits {
            max_runs: 1,
            ..ReadLimits::default()
        });
    let (_, _, log) = run_with(script, config);

    let calls = log.borrow().calls.clone();
    assert_eq!(
        calls,
        vec![
            "prepare_batch 2",
            "read 2",
            "read 2",
            "shutdown",
            "read 2",
            "prepare 2",
            "infer 2",
            "prepare 2",
            "infer 2",
            "infer 2",
            "shutdown",
        ]
    );
}

#[test]
fn slow_first_read_skips_repeated_reads() {
    let script = Script {
        read_secs: 60.0,
        ..Script::default()
    };
    let (report, events, log) = run(script, vec![1], 3);

    assert!(report.read.repeats_skipped);
    assert_eq!(report.read.repeat_count, 0);
    assert!(report.read.repeated.durations.is_empty());
    assert!(report.read.repeated.summary.is_none());
    assert!(close(report.read.first_read_seconds.unwrap(), 60.0));

    // The read phase still reports the cold read as a one-sample series.
    assert_eq!(report.read.first_read.durations.len(), 1);
    let first_read = report.read.first_read.summary.unwrap();
    assert!(close(first_read.average, 60.0));
    assert!(close(first_read.min, 60.0));
    assert!(close(first_read.max, 60.0));
    assert_eq!(first_read.samples, 1);

    // first read plus the load for batch 1
    assert_eq!(log.borrow().reads, 2);
    assert!(events.events.iter().any(|event| matches!(
        event,
        Event::Progress { phase: Phase::RepeatedRead, message, .. } if message.contains("skipping")
    )));
    assert_eq!(events.errors().count(), 0);
    assert_eq!(report.batch(1).unwrap().inference.durations.len(), 3);
}

#[test]
fn repeat_count_scales_with_first_read() {
    let script = Script {
        read_secs: 30.0,
        ..Script::default()
    };
    let (report, _, _) = run(script, vec![1], 1);
    assert_eq!(report.read.repeat_count, 20);
    assert_eq!(report.read.repeated.durations.len(), 20);
}

#[test]
fn zero_repeats_surface_insufficient_data() {
    let script = Script {
        read_secs: 700.0,
        ..Script::default()
    };
    let config = BenchmarkConfig::try_new(vec![1], 1)
        .unwrap()
        .with_read_limits(ReadLimits {
            ceiling: Duration::from_secs(1000),
            ..ReadLimits::default()
        });
    let (report, events, _) = run_with(script, config);

    assert_eq!(report.read.repeat_count, 0);
    assert!(!report.read.repeats_skipped);
    assert!(report.read.repeated.summary.is_none());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].category, ErrorCategory::InsufficientData);
    assert_eq!(events.errors().count(), 1);
    assert!(report.batch(1).is_some());
}

#[test]
fn preparation_failure_only_skips_that_batch() {
    let script = Script {
        read_secs: 1.0,
        fail_prepare: BTreeSet::from([8]),
        ..Script::default()
    };
    let (report, events, _) = run(script, vec![1, 4, 8], 4);

    assert_eq!(report.inference.len(), 2);
    for batch_size in [1, 4] {
        assert_eq!(
            report.batch(batch_size).unwrap().inference.durations.len(),
            4
        );
    }
    assert!(report.batch(8).is_none());

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.phase, Phase::BatchPreparation);
    assert_eq!(failure.category, ErrorCategory::Preparation);
    assert_eq!(failure.batch_size, Some(8));

    let error = events.errors().next().unwrap();
    assert!(matches!(
        error,
        Event::Error {
            category: ErrorCategory::Preparation,
            batch_size: Some(8),
            ..
        }
    ));
}

#[test]
fn backend_error_aborts_only_the_current_batch() {
    let script = Script {
        read_secs: 1.0,
        fail_infer: Some((4, 2)),
        ..Script::default()
    };
    let (report, _, log) = run(script, vec![1, 4, 8], 3);

    assert!(report.batch(1).is_some());
    assert!(report.batch(4).is_none());
    assert_eq!(report.batch(8).unwrap().inference.durations.len(), 3);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].phase, Phase::TimedInference);
    assert_eq!(report.failures[0].batch_size, Some(4));
    assert_eq!(log.borrow().calls.last().map(String::as_str), Some("shutdown"));
    assert!(report.shutdown_seconds.is_some());
}

#[test]
fn failed_first_read_still_runs_batches() {
    let script = Script {
        read_secs: 1.0,
        fail_read_call: Some(1),
        ..Script::default()
    };
    let (report, _, _) = run(script, vec![2], 2);

    assert!(report.read.first_read_seconds.is_none());
    assert!(report.read.repeated.durations.is_empty());
    assert_eq!(report.failures[0].phase, Phase::FirstRead);
    assert_eq!(report.batch(2).unwrap().inference.durations.len(), 2);
}

#[test]
fn failed_load_is_reported_as_warm_up() {
    let script = Script {
        read_secs: 1.0,
        // first read + 1 repeat, then the load for batch 1 fails
        fail_read_call: Some(3),
        ..Script::default()
    };
    let config = BenchmarkConfig::try_new(vec![1, 2], 2)
        .unwrap()
        .with_read_limits(ReadLimits {
            max_runs: 1,
            ..ReadLimits::default()
        });
    let (report, _, _) = run_with(script, config);

    assert!(report.batch(1).is_none());
    assert!(report.batch(2).is_some());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].phase, Phase::WarmUp);
    assert_eq!(report.failures[0].batch_size, Some(1));
}

#[test]
fn prepare_only_skips_timing() {
    let config = BenchmarkConfig::try_new(vec![1, 2], 10)
        .unwrap()
        .with_prepare_only(true);
    let (report, _, log) = run_with(Script::default(), config);

    assert!(report.prepare_only);
    assert!(report.inference.is_empty());
    assert!(report.read.first_read_seconds.is_none());
    assert_eq!(
        log.borrow().calls,
        vec!["prepare_batch 1", "prepare_batch 2", "shutdown"]
    );
    assert!(close(report.preparation_seconds, 1.0));
    assert_eq!(report.shutdown_seconds, Some(0.25));
}

#[test]
fn duplicate_batch_sizes_rerun_without_reloading() {
    let script = Script {
        read_secs: 1.0,
        warm_up_secs: 0.5,
        ..Script::default()
    };
    let config = BenchmarkConfig::try_new(vec![2, 2], 3)
        .unwrap()
        .with_read_limits(ReadLimits {
            max_runs: 1,
            ..ReadLimits::default()
        });
    let (report, _, log) = run_with(script, config);

    assert_eq!(report.batch_sizes, vec![2, 2]);
    let record = report.batch(2).unwrap();
    assert_eq!(record.inference.durations.len(), 3);
    assert!(close(record.warm_up_seconds.unwrap(), 1.5));

    let log = log.borrow();
    // first read, one repeat, one load
    assert_eq!(log.reads, 3);
    // one warm-up and two rounds of three
    assert_eq!(log.infers, 7);
}

#[test]
fn nothing_prepared_goes_straight_to_shutdown() {
    let script = Script {
        fail_prepare: BTreeSet::from([1, 2]),
        ..Script::default()
    };
    let (report, events, log) = run(script, vec![1, 2], 5);

    assert!(report.inference.is_empty());
    assert_eq!(log.borrow().reads, 0);
    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.failures[2].category, ErrorCategory::Configuration);
    assert_eq!(events.events.last().map(Event::phase), Some(Phase::Done));
    assert_eq!(log.borrow().calls.last().map(String::as_str), Some("shutdown"));
}

#[test]
fn shutdown_failure_is_reported_and_run_completes() {
    let script = Script {
        read_secs: 1.0,
        // the first shutdown precedes loading batch 1, the second is final
        fail_shutdown_call: Some(2),
        ..Script::default()
    };
    let (report, events, _) = run(script, vec![1], 2);

    assert!(report.shutdown_failed());
    assert!(report.shutdown_seconds.is_none());
    assert!(report.batch(1).is_some());
    assert_eq!(events.events.last().map(Event::phase), Some(Phase::Done));
    assert!(events
        .errors()
        .any(|event| event.phase() == Phase::Shutdown));
}

#[test]
fn single_timed_run_is_a_valid_series() {
    let script = Script {
        read_secs: 1.0,
        infer_secs: BTreeMap::from([(1, 0.2)]),
        ..Script::default()
    };
    let (report, _, _) = run(script, vec![1], 1);

    let summary = report.batch(1).unwrap().inference.summary.unwrap();
    for value in [
        summary.average,
        summary.median,
        summary.p90,
        summary.p95,
        summary.p99,
        summary.min,
        summary.max,
    ] {
        assert!(close(value, 0.2));
    }
}

fn progress_count(events: &MemorySink, phase: Phase) -> usize {
    events
        .events
        .iter()
        .filter(|event| matches!(event, Event::Progress { phase: p, .. } if *p == phase))
        .count()
}

#[test]
fn each_phase_transition_emits_progress() {
    let script = Script {
        read_secs: 1.0,
        ..Script::default()
    };
    let config = BenchmarkConfig::try_new(vec![2, 2, 4], 2)
        .unwrap()
        .with_read_limits(ReadLimits {
            max_runs: 3,
            ..ReadLimits::default()
        });
    let (_, events, _) = run_with(script, config);

    assert_eq!(progress_count(&events, Phase::FirstRead), 1);
    assert_eq!(progress_count(&events, Phase::RepeatedRead), 1);
    // the repeated 2 reuses the loaded model and does not warm up again
    assert_eq!(progress_count(&events, Phase::WarmUp), 2);
    assert_eq!(progress_count(&events, Phase::TimedInference), 3);
}
