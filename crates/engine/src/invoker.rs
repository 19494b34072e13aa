//! User action contract and invocation.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use redrive_core::{Attempt, Codec, CodecError, RawMessage, Timestamp};
use redrive_stream::Record;

/// Failure reported by a user action.
///
/// The action decides the class; the engine never inspects the cause.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Transient: the record is re-driven on a later tick.
    #[error("retryable failure: {0}")]
    Retryable(anyhow::Error),

    /// Permanent: the record is sent to the dead-letter channel.
    #[error("fatal failure: {0}")]
    Fatal(anyhow::Error),
}

impl ActionError {
    pub fn retryable(error: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(error.into())
    }

    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(error.into())
    }

    pub fn retryable_msg(message: impl Into<String>) -> Self {
        Self::Retryable(anyhow::Error::msg(message.into()))
    }

    pub fn fatal_msg(message: impl Into<String>) -> Self {
        Self::Fatal(anyhow::Error::msg(message.into()))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Side-effecting operation applied to every record.
pub trait RetryableAction<K, V>: Send {
    fn apply(&mut self, key: &K, value: &V) -> Result<(), ActionError>;
}

impl<K, V, F> RetryableAction<K, V> for F
where
    F: FnMut(&K, &V) -> Result<(), ActionError> + Send,
{
    fn apply(&mut self, key: &K, value: &V) -> Result<(), ActionError> {
        self(key, value)
    }
}

/// Classified result of one invocation.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<Result<(), ActionError>> for Outcome {
    fn from(result: Result<(), ActionError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(ActionError::Retryable(e)) => Self::Retryable(e),
            Err(ActionError::Fatal(e)) => Self::Fatal(e),
        }
    }
}

/// Runs the action against live records and against stored attempts.
pub struct ActionInvoker<K, V, A> {
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    action: A,
}

impl<K, V, A> ActionInvoker<K, V, A>
where
    A: RetryableAction<K, V>,
{
    pub fn new(key_codec: Arc<dyn Codec<K>>, value_codec: Arc<dyn Codec<V>>, action: A) -> Self {
        Self {
            key_codec,
            value_codec,
            action,
        }
    }

    /// Snapshot a live record as a first attempt received at `now`.
    pub fn capture(&self, record: &Record<K, V>, now: Timestamp) -> Result<Attempt, CodecError> {
        let key = self.key_codec.serialize(&record.topic, &record.key)?;
        let value = self.value_codec.serialize(&record.topic, &record.value)?;
        Ok(Attempt::new(record.topic.clone(), now, RawMessage::new(key, value)))
    }

    /// Invoke with already-decoded key and value.
    pub fn call(&mut self, key: &K, value: &V) -> Outcome {
        self.action.apply(key, value).into()
    }

    /// Decode a stored attempt and invoke.
    ///
    /// Bytes that no longer decode cannot succeed on any later try, so the
    /// attempt is classified fatal.
    pub fn invoke(&mut self, attempt: &Attempt) -> Outcome {
        match self.decode(attempt) {
            Ok((key, value)) => self.call(&key, &value),
            Err(e) => {
                warn!(
                    topic = attempt.topic_of_origin(),
                    time_received = %attempt.time_received(),
                    error = %e,
                    "stored attempt no longer decodes"
                );
                Outcome::Fatal(e.into())
            }
        }
    }

    pub fn decode(&self, attempt: &Attempt) -> Result<(K, V), CodecError> {
        let topic = attempt.topic_of_origin();
        let message = attempt.message();
        let key = self.key_codec.deserialize(topic, &message.key)?;
        let value = self.value_codec.deserialize(topic, &message.value)?;
        Ok((key, value))
    }

    pub fn key_codec(&self) -> Arc<dyn Codec<K>> {
        self.key_codec.clone()
    }

    pub fn value_codec(&self) -> Arc<dyn Codec<V>> {
        self.value_codec.clone()
    }
}

impl<K, V, A> core::fmt::Debug for ActionInvoker<K, V, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActionInvoker").finish_non_exhaustive()
    }
}
