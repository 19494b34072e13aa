//! Periodic re-drive of due attempts.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use redrive_core::{Attempt, Timestamp};

use crate::config::DeliveryMode;
use crate::error::EngineResult;
use crate::store::{AttemptStore, KeyValueStore};

/// Where one invocation left its attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    Rescheduled { at: Timestamp },
    DeadLettered,
    /// Sent toward the dead-letter channel, but no envelope could be built.
    DeadLetterDropped,
}

/// Summary of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TickReport {
    pub drained: u64,
    pub succeeded: u64,
    pub rescheduled: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
}

impl TickReport {
    fn record(&mut self, disposition: Disposition) {
        self.drained += 1;
        match disposition {
            Disposition::Succeeded => self.succeeded += 1,
            Disposition::Rescheduled { .. } => self.rescheduled += 1,
            Disposition::DeadLettered => self.dead_lettered += 1,
            Disposition::DeadLetterDropped => self.dropped += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.drained == 0
    }
}

/// Drains due attempts from a partition's store, oldest key first.
#[derive(Debug, Clone, Copy)]
pub struct RetryScheduler {
    tick_interval: Duration,
    delivery: DeliveryMode,
}

impl RetryScheduler {
    pub fn new(tick_interval: Duration, delivery: DeliveryMode) -> Self {
        Self {
            tick_interval,
            delivery,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn delivery(&self) -> DeliveryMode {
        self.delivery
    }

    /// Re-drive everything scheduled at or before `now`.
    ///
    /// Each due attempt has its invocation count bumped and is handed to
    /// `redrive`, which invokes the action and settles the outcome. Under
    /// [`DeliveryMode::AtMostOnce`] the attempt leaves the store first; under
    /// [`DeliveryMode::AtLeastOnce`] it stays until `redrive` settles it.
    ///
    /// Attempts rescheduled during the tick are not seen again until a later
    /// tick, since the due set is a snapshot.
    pub fn run_tick<S, F>(&self, store: &mut AttemptStore<S>, now: Timestamp, mut redrive: F) -> EngineResult<TickReport>
    where
        S: KeyValueStore,
        F: FnMut(&mut AttemptStore<S>, Attempt) -> EngineResult<Disposition>,
    {
        let mut report = TickReport::default();

        for due in store.due_before(now)? {
            let mut attempt = due?;
            if self.delivery == DeliveryMode::AtMostOnce {
                store.unschedule(&mut attempt)?;
            }
            attempt.record_retry();

            debug!(
                store = store.name(),
                topic = attempt.topic_of_origin(),
                time_received = %attempt.time_received(),
                attempts = attempt.attempts_count(),
                "re-driving attempt"
            );
            report.record(redrive(store, attempt)?);
        }

        if !report.is_empty() {
            debug!(store = store.name(), tick = %now, drained = report.drained, "tick complete");
        }
        Ok(report)
    }
}
