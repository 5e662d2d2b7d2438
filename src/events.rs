//! Structured progress output.
//!
//! The runner emits one [`Event`] per phase transition, metric and error.
//! Sinks decide how to render them: JSON lines, `tracing` records, or an
//! in-memory list for inspection.

use std::io::Write;

use serde::Serialize;

use crate::error::{BenchError, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    BatchPreparation,
    FirstRead,
    RepeatedRead,
    WarmUp,
    TimedInference,
    Shutdown,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::BatchPreparation => "batch_preparation",
            Self::FirstRead => "first_read",
            Self::RepeatedRead => "repeated_read",
            Self::WarmUp => "warm_up",
            Self::TimedInference => "timed_inference",
            Self::Shutdown => "shutdown",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Progress {
        phase: Phase,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        batch_size: Option<usize>,
    },
    Error {
        phase: Phase,
        category: ErrorCategory,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        batch_size: Option<usize>,
    },
    Metric {
        phase: Phase,
        name: String,
        value: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        batch_size: Option<usize>,
    },
}

impl Event {
    pub fn progress(phase: Phase, message: impl Into<String>) -> Self {
        Self::Progress {
            phase,
            message: message.into(),
            batch_size: None,
        }
    }

    pub fn error(phase: Phase, error: &BenchError) -> Self {
        Self::Error {
            phase,
            category: error.category(),
            message: error.to_string(),
            batch_size: None,
        }
    }

    pub fn metric(phase: Phase, name: impl Into<String>, value: f64) -> Self {
        Self::Metric {
            phase,
            name: name.into(),
            value,
            batch_size: None,
        }
    }

    /// Attaches the batch size the event refers to.
    pub fn for_batch(mut self, batch: usize) -> Self {
        match &mut self {
            Self::Progress { batch_size, .. }
            | Self::Error { batch_size, .. }
            | Self::Metric { batch_size, .. } => *batch_size = Some(batch),
        }
        self
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Progress { phase, .. } | Self::Error { phase, .. } | Self::Metric { phase, .. } => {
                *phase
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: Event) {
        let written = serde_json::to_writer(&mut self.writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(err) = written {
            tracing::warn!(error = %err, "failed to write progress event");
        }
    }
}

/// Forwards events to the installed `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Progress {
                phase,
                message,
                batch_size,
            } => {
                tracing::info!(%phase, batch_size = ?batch_size, "{}", message);
            }
            Event::Error {
                phase,
                category,
                message,
                batch_size,
            } => {
                tracing::error!(%phase, %category, batch_size = ?batch_size, "{}", message);
            }
            Event::Metric {
                phase,
                name,
                value,
                batch_size,
            } => {
                tracing::info!(%phase, batch_size = ?batch_size, value, "{}", name);
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|event| event.is_error())
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.events.iter().find_map(|event| match event {
            Event::Metric {
                name: metric, value, ..
            } if metric == name => Some(*value),
            _ => None,
        })
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}
