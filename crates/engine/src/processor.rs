//! Per-partition retryable processor.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use redrive_core::{Attempt, Clock, Timestamp};
use redrive_stream::{OutputChannel, OutputRecord, Record};

use crate::config::RetryConfig;
use crate::dead_letter::{DeadLetterRouter, RouteOutcome};
use crate::error::EngineResult;
use crate::invoker::{ActionInvoker, Outcome, RetryableAction};
use crate::policy::RetryPolicy;
use crate::scheduler::{Disposition, RetryScheduler, TickReport};
use crate::store::{AttemptStore, KeyValueStore};

/// Processor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub records_processed: u64,
    pub invocations: u64,
    pub succeeded: u64,
    pub rescheduled: u64,
    pub dead_lettered: u64,
    pub dead_letters_dropped: u64,
    pub ticks: u64,
}

impl ProcessorStats {
    fn record(&mut self, disposition: Disposition) {
        self.invocations += 1;
        match disposition {
            Disposition::Succeeded => self.succeeded += 1,
            Disposition::Rescheduled { .. } => self.rescheduled += 1,
            Disposition::DeadLettered => self.dead_lettered += 1,
            Disposition::DeadLetterDropped => self.dead_letters_dropped += 1,
        }
    }
}

/// Everything needed to settle an outcome, apart from the store.
struct Settlement<K, V, C> {
    node: String,
    tick_interval: Duration,
    policy: RetryPolicy,
    router: DeadLetterRouter<K, V, C>,
    stats: ProcessorStats,
}

impl<K, V, C> Settlement<K, V, C>
where
    K: Serialize,
    V: Serialize,
    C: OutputChannel<OutputRecord>,
{
    fn settle<S: KeyValueStore>(
        &mut self,
        store: &mut AttemptStore<S>,
        mut attempt: Attempt,
        outcome: Outcome,
        now: Timestamp,
    ) -> EngineResult<Disposition> {
        // The stored entry (at-least-once re-drive) is removed only after the
        // outcome is durable, so a failure below leaves it in place.
        let disposition = match outcome {
            Outcome::Success => {
                store.unschedule(&mut attempt)?;
                Disposition::Succeeded
            }
            Outcome::Retryable(error) if self.policy.should_retry(attempt.attempts_count()) => {
                let delay = self
                    .policy
                    .delay_for_attempt(attempt.attempts_count(), self.tick_interval);
                let at = now.saturating_add(delay);
                debug!(
                    node = %self.node,
                    attempts = attempt.attempts_count(),
                    scheduled_at = %at,
                    error = %error,
                    "retryable failure"
                );
                store.schedule(&mut attempt, at)?;
                Disposition::Rescheduled { at }
            }
            Outcome::Retryable(error) => {
                debug!(
                    node = %self.node,
                    attempts = attempt.attempts_count(),
                    error = %error,
                    "retry limit reached"
                );
                self.dead_letter(store, &mut attempt)?
            }
            Outcome::Fatal(error) => {
                debug!(
                    node = %self.node,
                    attempts = attempt.attempts_count(),
                    error = %error,
                    "fatal failure"
                );
                self.dead_letter(store, &mut attempt)?
            }
        };

        self.stats.record(disposition);
        Ok(disposition)
    }

    fn dead_letter<S: KeyValueStore>(
        &self,
        store: &mut AttemptStore<S>,
        attempt: &mut Attempt,
    ) -> EngineResult<Disposition> {
        let disposition = match self.router.route(attempt)? {
            RouteOutcome::Forwarded => Disposition::DeadLettered,
            RouteOutcome::EncodingFailed => Disposition::DeadLetterDropped,
        };
        store.unschedule(attempt)?;
        Ok(disposition)
    }
}

/// Retryable `foreach` bound to one partition.
///
/// Records are processed with [`process`](Self::process); the host (or a
/// [`PartitionWorker`](crate::worker::PartitionWorker)) calls
/// [`punctuate`](Self::punctuate) on every tick. Both run on the partition's
/// thread and never concurrently.
pub struct RetryableForeachProcessor<K, V, A, S, C> {
    partition: u32,
    invoker: ActionInvoker<K, V, A>,
    scheduler: RetryScheduler,
    store: AttemptStore<S>,
    settlement: Settlement<K, V, C>,
    clock: Arc<dyn Clock>,
}

impl<K, V, A, S, C> RetryableForeachProcessor<K, V, A, S, C>
where
    K: Serialize,
    V: Serialize,
    A: RetryableAction<K, V>,
    S: KeyValueStore,
    C: OutputChannel<OutputRecord>,
{
    pub fn new(
        node: impl Into<String>,
        partition: u32,
        config: &RetryConfig,
        store: AttemptStore<S>,
        invoker: ActionInvoker<K, V, A>,
        channel: C,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let router = DeadLetterRouter::new(invoker.key_codec(), invoker.value_codec(), channel);
        Self {
            partition,
            scheduler: RetryScheduler::new(config.tick_interval, config.delivery),
            store,
            settlement: Settlement {
                node: node.into(),
                tick_interval: config.tick_interval,
                policy: config.policy.clone(),
                router,
                stats: ProcessorStats::default(),
            },
            invoker,
            clock,
        }
    }

    /// First delivery of a record.
    pub fn process(&mut self, record: &Record<K, V>) -> EngineResult<Disposition> {
        let now = self.clock.now();
        let attempt = self.invoker.capture(record, now)?;
        self.settlement.stats.records_processed += 1;

        let outcome = self.invoker.call(&record.key, &record.value);
        self.settlement.settle(&mut self.store, attempt, outcome, now)
    }

    /// Re-drive every attempt due at `now`.
    pub fn punctuate(&mut self, now: Timestamp) -> EngineResult<TickReport> {
        let Self {
            invoker,
            scheduler,
            store,
            settlement,
            ..
        } = self;

        let report = scheduler.run_tick(store, now, |store, attempt| {
            let outcome = invoker.invoke(&attempt);
            settlement.settle(store, attempt, outcome, now)
        })?;
        settlement.stats.ticks += 1;
        Ok(report)
    }

    pub fn punctuate_now(&mut self) -> EngineResult<TickReport> {
        let now = self.clock.now();
        self.punctuate(now)
    }

    pub fn node_name(&self) -> &str {
        &self.settlement.node
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn tick_interval(&self) -> Duration {
        self.scheduler.tick_interval()
    }

    pub fn store(&self) -> &AttemptStore<S> {
        &self.store
    }

    pub fn into_store(self) -> AttemptStore<S> {
        self.store
    }

    pub fn dead_letter_channel(&self) -> &C {
        self.settlement.router.channel()
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.settlement.stats
    }
}

impl<K, V, A, S, C> core::fmt::Debug for RetryableForeachProcessor<K, V, A, S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryableForeachProcessor")
            .field("node", &self.settlement.node)
            .field("partition", &self.partition)
            .field("stats", &self.settlement.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryMode;
    use crate::invoker::ActionError;
    use std::sync::atomic::Ordering;

    use crate::error::EngineError;
    use crate::store::testing::FaultyStore;
    use crate::store::InMemoryKeyValueStore;
    use redrive_core::{ManualClock, StoreError, StringCodec};
    use redrive_stream::InMemoryChannel;

    type TestProcessor<A, S = InMemoryKeyValueStore> =
        RetryableForeachProcessor<String, String, A, S, Arc<InMemoryChannel<OutputRecord>>>;

    fn processor<A>(config: RetryConfig, clock: &ManualClock, action: A) -> TestProcessor<A>
    where
        A: RetryableAction<String, String>,
    {
        processor_over(InMemoryKeyValueStore::new("s"), config, clock, action)
    }

    fn processor_over<A, S>(kv: S, config: RetryConfig, clock: &ManualClock, action: A) -> TestProcessor<A, S>
    where
        A: RetryableAction<String, String>,
        S: KeyValueStore,
    {
        RetryableForeachProcessor::new(
            "RETRYABLE-FOREACH-0000000001",
            0,
            &config,
            AttemptStore::open(kv).unwrap(),
            ActionInvoker::new(Arc::new(StringCodec), Arc::new(StringCodec), action),
            Arc::new(InMemoryChannel::new("dead-letters")),
            Arc::new(clock.clone()),
        )
    }

    fn record() -> Record<String, String> {
        Record::new("orders", 0, "k1".to_string(), "v1".to_string())
    }

    #[test]
    fn retryable_failure_is_scheduled_one_tick_later() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let mut p = processor(RetryConfig::default(), &clock, |_: &String, _: &String| -> Result<(), ActionError> {
            Err(ActionError::retryable_msg("busy"))
        });

        let d = p.process(&record()).unwrap();
        assert_eq!(d, Disposition::Rescheduled { at: Timestamp::from_millis(1500) });

        let stored: Vec<_> = p
            .store()
            .due_before(Timestamp::MAX)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].attempts_count(), 1);
    }

    #[test]
    fn tick_before_schedule_does_nothing() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let mut p = processor(RetryConfig::default(), &clock, |_: &String, _: &String| -> Result<(), ActionError> {
            Err(ActionError::retryable_msg("busy"))
        });
        p.process(&record()).unwrap();

        let report = p.punctuate(Timestamp::from_millis(1499)).unwrap();
        assert!(report.is_empty());
        assert_eq!(p.store().len().unwrap(), 1);
    }

    #[test]
    fn redrive_reschedules_from_tick_time() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let mut p = processor(RetryConfig::default(), &clock, |_: &String, _: &String| -> Result<(), ActionError> {
            Err(ActionError::retryable_msg("busy"))
        });
        p.process(&record()).unwrap();

        let report = p.punctuate(Timestamp::from_millis(1600)).unwrap();
        assert_eq!(report.rescheduled, 1);
        let stored: Vec<_> = p
            .store()
            .due_before(Timestamp::MAX)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(stored[0].attempts_count(), 2);
        assert_eq!(stored[0].scheduled_at(), Some(Timestamp::from_millis(2100)));
    }

    #[test]
    fn at_least_once_settles_the_stored_entry() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let mut first = true;
        let config = RetryConfig::default().with_delivery(DeliveryMode::AtLeastOnce);
        let mut p = processor(config, &clock, move |_: &String, _: &String| -> Result<(), ActionError> {
            if std::mem::take(&mut first) {
                Err(ActionError::retryable_msg("busy"))
            } else {
                Ok(())
            }
        });
        p.process(&record()).unwrap();

        let report = p.punctuate(Timestamp::from_millis(1500)).unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(p.store().is_empty().unwrap());
        assert_eq!(p.stats().invocations, 2);
        assert_eq!(p.stats().ticks, 1);
    }

    #[test]
    fn at_least_once_keeps_the_entry_when_dead_letter_publish_fails() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let mut first = true;
        let config = RetryConfig::default().with_delivery(DeliveryMode::AtLeastOnce);
        let mut p = processor(config, &clock, move |_: &String, _: &String| -> Result<(), ActionError> {
            if std::mem::take(&mut first) {
                Err(ActionError::retryable_msg("busy"))
            } else {
                Err(ActionError::fatal_msg("unprocessable"))
            }
        });
        p.process(&record()).unwrap();
        p.dead_letter_channel().close();

        let err = p.punctuate(Timestamp::from_millis(1500)).unwrap_err();
        assert!(matches!(err, EngineError::DeadLetter { .. }));
        assert!(p.dead_letter_channel().published().is_empty());

        let stored: Vec<_> = p
            .store()
            .due_before(Timestamp::MAX)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].attempts_count(), 1);
    }

    #[test]
    fn at_least_once_keeps_the_entry_when_reschedule_write_fails() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let kv = FaultyStore::new("s");
        let failing = kv.switch();
        let config = RetryConfig::default().with_delivery(DeliveryMode::AtLeastOnce);
        let mut p = processor_over(kv, config, &clock, |_: &String, _: &String| -> Result<(), ActionError> {
            Err(ActionError::retryable_msg("busy"))
        });
        p.process(&record()).unwrap();

        failing.store(true, Ordering::SeqCst);
        let err = p.punctuate(Timestamp::from_millis(1500)).unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Io { .. })));
        assert_eq!(p.store().inner().len(), 1);

        failing.store(false, Ordering::SeqCst);
        assert_eq!(p.punctuate(Timestamp::from_millis(1500)).unwrap().rescheduled, 1);
        let stored: Vec<_> = p
            .store()
            .due_before(Timestamp::MAX)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].attempts_count(), 2);
    }

    #[test]
    fn store_failure_propagates_from_process() {
        let clock = ManualClock::new(Timestamp::from_millis(1000));
        let kv = FaultyStore::new("s");
        kv.switch().store(true, Ordering::SeqCst);
        let mut p = processor_over(kv, RetryConfig::default(), &clock, |_: &String, _: &String| -> Result<(), ActionError> {
            Err(ActionError::retryable_msg("busy"))
        });

        let err = p.process(&record()).unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Io { .. })));
        assert_eq!(p.stats().rescheduled, 0);
        assert!(p.dead_letter_channel().is_empty());
    }
}
