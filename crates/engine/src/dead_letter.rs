//! Dead-letter envelopes and their forwarding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use redrive_core::{Attempt, Codec, CodecError};
use redrive_stream::{OutputChannel, OutputRecord};

use crate::error::{EngineError, EngineResult};

/// Diagnostic record written to the dead-letter channel.
///
/// Every field is a string. `message` is itself a JSON document holding the
/// decoded key and value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub topic_of_origin: String,
    pub time_received: String,
    pub attempts: String,
    pub message: String,
}

#[derive(Serialize)]
struct MessageBody<'a, K, V> {
    key: &'a K,
    value: &'a V,
}

impl DeadLetterEnvelope {
    /// Build the envelope from already-decoded key and value.
    pub fn new<K, V>(attempt: &Attempt, key: &K, value: &V) -> Result<Self, EnvelopeError>
    where
        K: Serialize,
        V: Serialize,
    {
        let message = serde_json::to_string(&MessageBody { key, value })?;
        Ok(Self {
            topic_of_origin: attempt.topic_of_origin().to_string(),
            time_received: attempt.time_received().to_string(),
            attempts: attempt.attempts_count().to_string(),
            message,
        })
    }

    /// Output key: `{topicOfOrigin}.{timeReceived}`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.topic_of_origin, self.time_received)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_output_record(&self) -> Result<OutputRecord, EnvelopeError> {
        Ok(OutputRecord::new(self.key(), self.to_json()?))
    }
}

/// The envelope for a record could not be produced.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("record no longer decodes: {0}")]
    Codec(#[from] CodecError),

    #[error("envelope serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// What happened to a record handed to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded,
    /// No envelope could be built; nothing was published.
    EncodingFailed,
}

/// Forwards permanently failed attempts to the dead-letter channel.
pub struct DeadLetterRouter<K, V, C> {
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    channel: C,
}

impl<K, V, C> DeadLetterRouter<K, V, C>
where
    K: Serialize,
    V: Serialize,
    C: OutputChannel<OutputRecord>,
{
    pub fn new(key_codec: Arc<dyn Codec<K>>, value_codec: Arc<dyn Codec<V>>, channel: C) -> Self {
        Self {
            key_codec,
            value_codec,
            channel,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn envelope(&self, attempt: &Attempt) -> Result<DeadLetterEnvelope, EnvelopeError> {
        let topic = attempt.topic_of_origin();
        let key = self.key_codec.deserialize(topic, &attempt.message().key)?;
        let value = self.value_codec.deserialize(topic, &attempt.message().value)?;
        DeadLetterEnvelope::new(attempt, &key, &value)
    }

    /// Publish the envelope for `attempt`.
    ///
    /// Envelope failures are logged and reported as
    /// [`RouteOutcome::EncodingFailed`]. A channel that refuses the record is
    /// an infrastructure failure and is returned as an error.
    pub fn route(&self, attempt: &Attempt) -> EngineResult<RouteOutcome> {
        let record = match self.envelope(attempt).and_then(|env| env.to_output_record()) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    channel = self.channel.name(),
                    topic = attempt.topic_of_origin(),
                    time_received = %attempt.time_received(),
                    attempts = attempt.attempts_count(),
                    error = %e,
                    "dead-letter envelope could not be built; record dropped"
                );
                return Ok(RouteOutcome::EncodingFailed);
            }
        };

        let key = record.key.clone();
        self.channel.publish(record).map_err(|e| EngineError::DeadLetter {
            channel: self.channel.name().to_string(),
            key: key.clone(),
            message: format!("{e:?}"),
        })?;

        warn!(
            channel = self.channel.name(),
            key = %key,
            attempts = attempt.attempts_count(),
            "record dead-lettered"
        );
        Ok(RouteOutcome::Forwarded)
    }
}

impl<K, V, C> core::fmt::Debug for DeadLetterRouter<K, V, C>
where
    C: OutputChannel<OutputRecord>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeadLetterRouter")
            .field("channel", &self.channel.name())
            .finish_non_exhaustive()
    }
}
