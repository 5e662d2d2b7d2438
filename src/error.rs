//! Error taxonomy for the benchmark harness.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    /// The batch-size specific artifact could not be produced.
    #[error("failed to prepare batch size {batch_size}: {message}")]
    Preparation { batch_size: usize, message: String },

    /// A lifecycle call on the backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The aggregator was handed an empty series.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Invalid run parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown backend '{id}', available: {}", available.join(", "))]
    UnknownBackend { id: String, available: Vec<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    pub fn preparation(batch_size: usize, message: impl Into<String>) -> Self {
        Self::Preparation {
            batch_size,
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Preparation { .. } => ErrorCategory::Preparation,
            Self::Backend(_) => ErrorCategory::Backend,
            Self::InsufficientData(_) => ErrorCategory::InsufficientData,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::UnknownBackend { .. } => ErrorCategory::Registry,
            Self::Io(_) => ErrorCategory::Io,
        }
    }
}

/// Category tag carried by structured error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Preparation,
    Backend,
    InsufficientData,
    Configuration,
    Registry,
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Preparation => "preparation",
            Self::Backend => "backend",
            Self::InsufficientData => "insufficient_data",
            Self::Configuration => "configuration",
            Self::Registry => "registry",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
