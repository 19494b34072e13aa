//! Attempt model: one record occurrence plus its retry bookkeeping.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Key and value bytes exactly as read from the source topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawMessage {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// Position of an attempt in the retry store.
///
/// Ordered by schedule time, then by the store-assigned sequence, so attempts
/// that share a schedule time keep their insertion order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleKey {
    pub scheduled_at: Timestamp,
    pub sequence: u64,
}

impl ScheduleKey {
    pub const ENCODED_LEN: usize = 16;

    pub fn new(scheduled_at: Timestamp, sequence: u64) -> Self {
        Self {
            scheduled_at,
            sequence,
        }
    }

    /// Largest key scheduled at or before `at`.
    pub fn upper_bound(at: Timestamp) -> Self {
        Self::new(at, u64::MAX)
    }

    /// Order-preserving byte encoding: lexicographic order of the bytes equals
    /// the `Ord` order of the keys.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        // Flipping the sign bit maps i64 order onto u64 order.
        let time = (self.scheduled_at.as_millis() as u64) ^ (1 << 63);
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&time.to_be_bytes());
        out[8..].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let time: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        let sequence: [u8; 8] = bytes.get(8..Self::ENCODED_LEN)?.try_into().ok()?;
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let millis = (u64::from_be_bytes(time) ^ (1 << 63)) as i64;
        Some(Self::new(
            Timestamp::from_millis(millis),
            u64::from_be_bytes(sequence),
        ))
    }
}

/// A single record occurrence and its retry state.
///
/// `topic_of_origin`, `time_received` and `message` never change after
/// construction. `attempts_count` is at least 1 and counts invocations of the
/// action. `schedule` is set only while the attempt waits in the retry store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    topic_of_origin: String,
    time_received: Timestamp,
    message: RawMessage,
    attempts_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedule: Option<ScheduleKey>,
}

impl Attempt {
    pub fn new(topic_of_origin: impl Into<String>, time_received: Timestamp, message: RawMessage) -> Self {
        Self {
            topic_of_origin: topic_of_origin.into(),
            time_received,
            message,
            attempts_count: 1,
            schedule: None,
        }
    }

    pub fn topic_of_origin(&self) -> &str {
        &self.topic_of_origin
    }

    pub fn time_received(&self) -> Timestamp {
        self.time_received
    }

    pub fn message(&self) -> &RawMessage {
        &self.message
    }

    pub fn attempts_count(&self) -> u32 {
        self.attempts_count
    }

    pub fn schedule_key(&self) -> Option<ScheduleKey> {
        self.schedule
    }

    pub fn scheduled_at(&self) -> Option<Timestamp> {
        self.schedule.map(|k| k.scheduled_at)
    }

    /// Count one more invocation of the action.
    pub fn record_retry(&mut self) {
        self.attempts_count = self.attempts_count.saturating_add(1);
    }

    /// Attach the store position. Only the retry store should call this.
    pub fn assign_schedule(&mut self, key: ScheduleKey) {
        self.schedule = Some(key);
    }

    /// Detach the store position, returning the previous one.
    pub fn clear_schedule(&mut self) -> Option<ScheduleKey> {
        self.schedule.take()
    }

    /// `false` for attempts decoded from a store that violate the model.
    pub fn is_well_formed(&self) -> bool {
        self.attempts_count >= 1
    }
}
