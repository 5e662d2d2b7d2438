//! Monotonic checkpoint recording.
//!
//! A [`CheckpointRecorder`] collects timestamps from a single [`Clock`] and
//! turns them into a duration series: N checkpoints yield N - 1 durations.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic timestamps, expressed as the time elapsed since the
/// clock's own origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall-clock-adjustment-immune clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time, so a
/// backend under test can advance the clock the harness reads from.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointRecorder<C: Clock> {
    clock: C,
    checkpoints: Vec<Duration>,
}

impl<C: Clock> CheckpointRecorder<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            checkpoints: Vec::new(),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Appends the current time. With `reset` the previous series is dropped
    /// first and the new checkpoint starts a fresh one.
    pub fn checkpoint(&mut self, reset: bool) {
        if reset {
            self.checkpoints.clear();
        }
        self.checkpoints.push(self.clock.now());
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Last checkpoint minus first checkpoint, zero for fewer than two.
    pub fn elapsed_since_start(&self) -> Duration {
        match (self.checkpoints.first(), self.checkpoints.last()) {
            (Some(first), Some(last)) => last.saturating_sub(*first),
            _ => Duration::ZERO,
        }
    }

    /// Elapsed seconds between consecutive checkpoints.
    pub fn durations(&self) -> Vec<f64> {
        self.checkpoints
            .windows(2)
            .map(|pair| pair[1].saturating_sub(pair[0]).as_secs_f64())
            .collect()
    }
}
