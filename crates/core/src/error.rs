//! Shared error model.

use thiserror::Error;

/// Failure while converting a record key or value to or from bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("serialization failed for topic '{topic}': {message}")]
    Serialize { topic: String, message: String },

    #[error("deserialization failed for topic '{topic}': {message}")]
    Deserialize { topic: String, message: String },
}

impl CodecError {
    pub fn serialize(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialize {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn deserialize(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deserialize {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Failure of the backing key-value store.
///
/// These are infrastructure failures: the engine never retries them and they
/// stop the owning partition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The underlying store could not complete the operation.
    #[error("store '{store}' i/o failure: {message}")]
    Io { store: String, message: String },

    /// An entry could not be decoded into an attempt.
    #[error("store '{store}' holds a corrupt entry: {message}")]
    Corrupt { store: String, message: String },

    /// An internal lock was poisoned by a panicking thread.
    #[error("store '{0}' lock poisoned")]
    Poisoned(String),
}

impl StoreError {
    pub fn io(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            store: store.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            store: store.into(),
            message: message.into(),
        }
    }
}
