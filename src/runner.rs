use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::BenchmarkConfig;
use crate::error::{BenchError, Result};
use crate::events::{Event, EventSink, Phase};
use crate::model::BenchmarkModel;
use crate::report::{BatchRecord, BenchmarkReport, FailureRecord, PhaseTimings};
use crate::stats::Summary;
use crate::timer::{CheckpointRecorder, Clock};

/// Drives `model` through the whole benchmark: batch preparation, first and
/// repeated reads, then warm-up and timed inference for every requested batch
/// size, and a final shutdown.
///
/// Errors never abort the invocation. They are emitted as events, collected in
/// [`BenchmarkReport::failures`], and the run moves on to the next piece of
/// independent work. Shutdown always runs.
#[tracing::instrument(skip_all, fields(model = %model_id))]
pub fn run_benchmark<C: Clock>(
    model: &mut BenchmarkModel,
    model_id: &str,
    config: &BenchmarkConfig,
    clock: C,
    events: &mut dyn EventSink,
) -> BenchmarkReport {
    let mut run = Run {
        model,
        config,
        recorder: CheckpointRecorder::new(clock),
        events,
        report: BenchmarkReport::new(model_id, ""),
    };
    run.execute();
    run.report
}

struct Run<'a, C: Clock> {
    model: &'a mut BenchmarkModel,
    config: &'a BenchmarkConfig,
    recorder: CheckpointRecorder<C>,
    events: &'a mut dyn EventSink,
    report: BenchmarkReport,
}

impl<C: Clock> Run<'_, C> {
    fn execute(&mut self) {
        let started = self.recorder.clock().now();
        self.model
            .set_total_inference_runs(self.config.total_inference_runs);

        self.report.description = self.model.description().to_string();
        self.report.batch_sizes = self.config.batch_sizes.clone();
        self.report.total_inference_runs = self.config.total_inference_runs;
        self.report.prepare_only = self.config.prepare_only;

        self.emit(Event::progress(
            Phase::Start,
            format!(
                "benchmarking {} ({}) on {}",
                self.report.model, self.report.description, self.report.platform
            ),
        ));

        let failed = self.prepare_batches();

        if self.config.prepare_only {
            self.emit(Event::progress(
                Phase::BatchPreparation,
                "prepare only, skipping timing phases",
            ));
        } else {
            let prepared: Vec<usize> = self
                .config
                .batch_sizes
                .iter()
                .copied()
                .filter(|size| !failed.contains(size))
                .collect();

            match prepared.first() {
                Some(&read_batch) => {
                    self.read_phases(read_batch);
                    self.model.clear_batch_size();
                    for batch_size in self.config.batch_sizes.clone() {
                        if failed.contains(&batch_size) {
                            self.emit(
                                Event::progress(
                                    Phase::TimedInference,
                                    "skipping batch size that failed preparation",
                                )
                                .for_batch(batch_size),
                            );
                            continue;
                        }
                        self.run_batch(batch_size);
                    }
                }
                None => {
                    let err = BenchError::Configuration(
                        "no batch size could be prepared, skipping read and inference"
                            .to_string(),
                    );
                    self.fail(Phase::FirstRead, None, &err);
                }
            }
        }

        self.shutdown();

        let total = self.recorder.clock().now().saturating_sub(started);
        self.report.total_seconds = total.as_secs_f64();
        self.emit(Event::metric(
            Phase::Done,
            "total_seconds",
            self.report.total_seconds,
        ));
        self.emit(Event::progress(Phase::Done, "done"));
    }

    /// Returns the batch sizes whose preparation failed.
    fn prepare_batches(&mut self) -> BTreeSet<usize> {
        let mut failed = BTreeSet::new();
        self.recorder.checkpoint(true);

        for batch_size in self.config.batch_sizes.clone() {
            self.emit(
                Event::progress(Phase::BatchPreparation, "preparing batch size")
                    .for_batch(batch_size),
            );
            if let Err(err) = self.model.prepare_batch(batch_size) {
                failed.insert(batch_size);
                self.fail(Phase::BatchPreparation, Some(batch_size), &err);
            }
        }

        self.recorder.checkpoint(false);
        let elapsed = self.recorder.elapsed_since_start().as_secs_f64();
        self.report.preparation_seconds = elapsed;
        self.emit(Event::metric(
            Phase::BatchPreparation,
            "preparation_seconds",
            elapsed,
        ));
        failed
    }

    fn read_phases(&mut self, batch_size: usize) {
        self.report.read.batch_size = Some(batch_size);
        self.model.set_batch_size(batch_size);

        let first_read = match self.first_read(batch_size) {
            Ok(first_read) => first_read,
            Err(err) => {
                self.fail(Phase::FirstRead, Some(batch_size), &err);
                self.model.clear_batch_size();
                return;
            }
        };

        let Some(repeats) = self.config.read_limits.repeat_count(first_read) else {
            self.report.read.repeats_skipped = true;
            self.emit(
                Event::progress(
                    Phase::RepeatedRead,
                    format!(
                        "first read took {:.3}s, at or above the {:.0}s ceiling; skipping repeated reads",
                        first_read.as_secs_f64(),
                        self.config.read_limits.ceiling.as_secs_f64()
                    ),
                )
                .for_batch(batch_size),
            );
            return;
        };

        self.report.read.repeat_count = repeats;
        self.emit(
            Event::progress(Phase::RepeatedRead, format!("{} repeated reads", repeats))
                .for_batch(batch_size),
        );
        self.emit(
            Event::metric(Phase::RepeatedRead, "read_runs", repeats as f64).for_batch(batch_size),
        );

        match self.repeated_reads(repeats) {
            Ok(durations) => {
                let total = self.recorder.elapsed_since_start().as_secs_f64();
                self.emit(
                    Event::metric(Phase::RepeatedRead, "total_read_seconds", total)
                        .for_batch(batch_size),
                );
                self.report.read.repeated = self.summarize(Phase::RepeatedRead, batch_size, durations);
            }
            Err(err) => {
                self.fail(Phase::RepeatedRead, Some(batch_size), &err);
                self.model.clear_batch_size();
            }
        }
    }

    fn first_read(&mut self, batch_size: usize) -> Result<Duration> {
        self.emit(Event::progress(Phase::FirstRead, "first read").for_batch(batch_size));
        self.recorder.checkpoint(true);
        self.model.read()?;
        self.recorder.checkpoint(false);

        let first_read = self.recorder.elapsed_since_start();
        let seconds = first_read.as_secs_f64();
        self.report.read.first_read_seconds = Some(seconds);
        self.emit(
            Event::metric(Phase::FirstRead, "first_read_seconds", seconds).for_batch(batch_size),
        );
        self.report.read.first_read = self.summarize(Phase::FirstRead, batch_size, vec![seconds]);
        Ok(first_read)
    }

    fn repeated_reads(&mut self, repeats: usize) -> Result<Vec<f64>> {
        self.recorder.checkpoint(true);
        for _ in 0..repeats {
            self.model.read()?;
            self.recorder.checkpoint(false);
        }
        Ok(self.recorder.durations())
    }

    fn run_batch(&mut self, batch_size: usize) {
        let warm_up_seconds = if self.model.batch_size() != Some(batch_size) {
            self.emit(Event::progress(Phase::WarmUp, "loading batch size").for_batch(batch_size));
            match self.load_and_warm_up(batch_size) {
                Ok(seconds) => Some(seconds),
                Err(err) => {
                    self.fail(Phase::WarmUp, Some(batch_size), &err);
                    self.model.clear_batch_size();
                    return;
                }
            }
        } else {
            None
        };

        self.emit(
            Event::progress(
                Phase::TimedInference,
                format!("timing {} inferences", self.model.total_inference_runs()),
            )
            .for_batch(batch_size),
        );
        let durations = match self.timed_inference() {
            Ok(durations) => durations,
            Err(err) => {
                self.fail(Phase::TimedInference, Some(batch_size), &err);
                self.model.clear_batch_size();
                return;
            }
        };

        let total = self.recorder.elapsed_since_start().as_secs_f64();
        self.emit(
            Event::metric(Phase::TimedInference, "total_inference_seconds", total)
                .for_batch(batch_size),
        );

        let inference = self.summarize(Phase::TimedInference, batch_size, durations);
        let throughput = inference.summary.map(|summary| {
            let throughput = summary.throughput(batch_size);
            if let Some(rate) = throughput.inferences_per_second.average {
                self.emit(
                    Event::metric(Phase::TimedInference, "inferences_per_second", rate)
                        .for_batch(batch_size),
                );
            }
            throughput
        });

        // A repeated batch size reuses the loaded model, keep its warm-up.
        let warm_up_seconds = warm_up_seconds.or_else(|| {
            self.report
                .inference
                .get(&batch_size)
                .and_then(|previous| previous.warm_up_seconds)
        });
        self.report.inference.insert(
            batch_size,
            BatchRecord {
                batch_size,
                warm_up_seconds,
                inference,
                throughput,
            },
        );
    }

    /// Shuts down whatever is loaded, loads `batch_size` and warms it up. The
    /// read and warm-up are timed together.
    fn load_and_warm_up(&mut self, batch_size: usize) -> Result<f64> {
        self.model.shutdown()?;
        self.model.set_batch_size(batch_size);

        self.recorder.checkpoint(true);
        self.model.read()?;
        self.model.warm_up()?;
        self.recorder.checkpoint(false);

        let seconds = self.recorder.elapsed_since_start().as_secs_f64();
        self.emit(Event::metric(Phase::WarmUp, "warm_up_seconds", seconds).for_batch(batch_size));
        Ok(seconds)
    }

    fn timed_inference(&mut self) -> Result<Vec<f64>> {
        self.model.reset_inference_run();
        self.model.prepare()?;

        self.recorder.checkpoint(true);
        while self.model.next_inference_run() {
            self.model.infer()?;
            self.recorder.checkpoint(false);
        }
        Ok(self.recorder.durations())
    }

    fn shutdown(&mut self) {
        self.emit(Event::progress(Phase::Shutdown, "shutting down"));
        self.recorder.checkpoint(true);
        let result = self.model.shutdown();
        self.recorder.checkpoint(false);
        self.model.clear_batch_size();

        match result {
            Ok(()) => {
                let seconds = self.recorder.elapsed_since_start().as_secs_f64();
                self.report.shutdown_seconds = Some(seconds);
                self.emit(Event::metric(Phase::Shutdown, "shutdown_seconds", seconds));
            }
            Err(err) => self.fail(Phase::Shutdown, None, &err),
        }
    }

    fn summarize(&mut self, phase: Phase, batch_size: usize, durations: Vec<f64>) -> PhaseTimings {
        let summary = match Summary::from_series(&durations) {
            Ok(summary) => {
                for (name, value) in [
                    ("average_seconds", summary.average),
                    ("median_seconds", summary.median),
                    ("min_seconds", summary.min),
                    ("max_seconds", summary.max),
                ] {
                    self.emit(Event::metric(phase, name, value).for_batch(batch_size));
                }
                Some(summary)
            }
            Err(err) => {
                self.fail(phase, Some(batch_size), &err);
                None
            }
        };
        PhaseTimings { durations, summary }
    }

    fn fail(&mut self, phase: Phase, batch_size: Option<usize>, err: &BenchError) {
        tracing::debug!(%phase, ?batch_size, error = %err, "phase failed");
        let mut event = Event::error(phase, err);
        if let Some(batch_size) = batch_size {
            event = event.for_batch(batch_size);
        }
        self.emit(event);
        self.report.failures.push(FailureRecord {
            phase,
            category: err.category(),
            batch_size,
            message: err.to_string(),
        });
    }

    fn emit(&mut self, event: Event) {
        tracing::debug!(phase = %event.phase(), "event");
        self.events.emit(event);
    }
}
