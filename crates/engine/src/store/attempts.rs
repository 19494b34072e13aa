//! Durable queue of attempts awaiting re-drive.

use tracing::debug;

use redrive_core::{Attempt, ScheduleKey, StoreError, Timestamp};

use super::kv::KeyValueStore;

/// Partition-local retry store keyed by [`ScheduleKey`].
///
/// An attempt is in the store iff it has a schedule attached. Values are the
/// JSON form of the attempt; keys are the order-preserving encoding of the
/// schedule key, so the underlying store's key order is the re-drive order.
#[derive(Debug)]
pub struct AttemptStore<S> {
    kv: S,
    next_sequence: u64,
}

impl<S: KeyValueStore> AttemptStore<S> {
    /// Wrap a store, resuming the sequence after any entries already in it.
    pub fn open(kv: S) -> Result<Self, StoreError> {
        let upper = ScheduleKey::upper_bound(Timestamp::MAX).encode();
        let mut next_sequence = 0u64;
        for (key, _) in kv.range_to(&upper)? {
            let key = ScheduleKey::decode(&key)
                .ok_or_else(|| StoreError::corrupt(kv.name(), "malformed schedule key"))?;
            next_sequence = next_sequence.max(key.sequence.saturating_add(1));
        }

        debug!(store = kv.name(), next_sequence, "opened attempt store");
        Ok(Self { kv, next_sequence })
    }

    pub fn name(&self) -> &str {
        self.kv.name()
    }

    /// Persist `attempt` for re-drive at `at`, attaching its schedule key.
    ///
    /// An attempt that already carries a schedule is moved: the new entry is
    /// written before the old one is removed. If the write fails the attempt
    /// keeps its previous schedule and the store is unchanged.
    pub fn schedule(&mut self, attempt: &mut Attempt, at: Timestamp) -> Result<ScheduleKey, StoreError> {
        let previous = attempt.schedule_key();
        let key = ScheduleKey::new(at, self.next_sequence);
        self.next_sequence = self.next_sequence.saturating_add(1);

        attempt.assign_schedule(key);
        if let Err(e) = self.write(attempt, key) {
            match previous {
                Some(old) => attempt.assign_schedule(old),
                None => {
                    attempt.clear_schedule();
                }
            }
            return Err(e);
        }
        if let Some(old) = previous {
            self.kv.delete(&old.encode())?;
        }

        debug!(
            store = self.kv.name(),
            topic = attempt.topic_of_origin(),
            time_received = %attempt.time_received(),
            attempts = attempt.attempts_count(),
            scheduled_at = %at,
            "attempt scheduled"
        );
        Ok(key)
    }

    fn write(&mut self, attempt: &Attempt, key: ScheduleKey) -> Result<(), StoreError> {
        let value = serde_json::to_vec(attempt)
            .map_err(|e| StoreError::corrupt(self.kv.name(), format!("attempt serialization failed: {e}")))?;
        self.kv.put(&key.encode(), value)
    }

    /// Every attempt scheduled at or before `t`, ascending by key.
    ///
    /// The result is a snapshot taken now; attempts are decoded lazily as the
    /// iterator is consumed. Query again to observe later changes.
    pub fn due_before(&self, t: Timestamp) -> Result<DueAttempts, StoreError> {
        let upper = ScheduleKey::upper_bound(t).encode();
        let entries = self.kv.range_to(&upper)?;
        Ok(DueAttempts {
            store: self.kv.name().to_string(),
            entries: entries.into_iter(),
        })
    }

    /// Remove `attempt` from the store and detach its schedule.
    ///
    /// Returns whether the attempt carried a schedule. Unscheduling twice, or
    /// unscheduling an attempt that was never scheduled, changes nothing.
    pub fn unschedule(&mut self, attempt: &mut Attempt) -> Result<bool, StoreError> {
        let Some(key) = attempt.schedule_key() else {
            return Ok(false);
        };
        self.kv.delete(&key.encode())?;
        attempt.clear_schedule();
        Ok(true)
    }

    /// Number of attempts waiting.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.due_before(Timestamp::MAX)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn inner(&self) -> &S {
        &self.kv
    }

    pub fn into_inner(self) -> S {
        self.kv
    }
}

/// One-shot, ascending iterator over due attempts.
#[derive(Debug)]
pub struct DueAttempts {
    store: String,
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl DueAttempts {
    fn decode(&self, key: &[u8], value: &[u8]) -> Result<Attempt, StoreError> {
        let key = ScheduleKey::decode(key)
            .ok_or_else(|| StoreError::corrupt(&self.store, "malformed schedule key"))?;
        let mut attempt: Attempt = serde_json::from_slice(value)
            .map_err(|e| StoreError::corrupt(&self.store, format!("attempt decode failed: {e}")))?;
        if !attempt.is_well_formed() {
            return Err(StoreError::corrupt(&self.store, "attempt with zero invocations"));
        }
        // The key is authoritative for the schedule.
        attempt.assign_schedule(key);
        Ok(attempt)
    }
}

impl Iterator for DueAttempts {
    type Item = Result<Attempt, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.entries.next()?;
        Some(self.decode(&key, &value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for DueAttempts {}
