//! Engine error model.

use thiserror::Error;

use redrive_core::{CodecError, StoreError};
use redrive_stream::TopologyError;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures that escape the per-record and per-tick entry points.
///
/// Action failures never appear here: retryable ones are rescheduled and
/// fatal ones are dead-lettered. What remains are infrastructure failures
/// that stop the owning partition.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The retry store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An incoming record could not be captured as bytes.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The dead-letter channel refused an envelope.
    #[error("dead-letter channel '{channel}' rejected record '{key}': {message}")]
    DeadLetter {
        channel: String,
        key: String,
        message: String,
    },

    /// Operator registration failed.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The partition worker thread is gone.
    #[error("partition worker '{0}' has stopped")]
    WorkerStopped(String),

    /// The partition worker thread panicked.
    #[error("partition worker '{0}' panicked")]
    WorkerPanicked(String),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
