//! End-to-end retry behaviour of a single partition, driven by a manual clock.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use redrive_core::{Clock, ManualClock, StoreError, StringCodec, Timestamp};
use redrive_engine::{
    ActionError, Disposition, InMemoryKeyValueStore, RetryConfig, RetryableAction, RetryableForeachExt,
    RetryableForeachProcessor, RetryableNode,
};
use redrive_engine::{DeadLetterEnvelope, DeliveryMode, KeyValueStore};
use redrive_stream::{InMemoryChannel, NodeKind, OutputRecord, Record, SourceStream, TopologyBuilder};

type Channel = Arc<InMemoryChannel<OutputRecord>>;
type Processor<A> = RetryableForeachProcessor<String, String, A, InMemoryKeyValueStore, Channel>;

/// Action failing with the scripted errors first, then succeeding.
#[derive(Clone)]
struct Scripted {
    calls: Arc<AtomicU32>,
    retryable_failures: u32,
    fatal: bool,
}

impl Scripted {
    fn new(retryable_failures: u32, fatal: bool) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            retryable_failures,
            fatal,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RetryableAction<String, String> for Scripted {
    fn apply(&mut self, _key: &String, _value: &String) -> Result<(), ActionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(ActionError::fatal_msg("unprocessable"));
        }
        if n < self.retryable_failures {
            return Err(ActionError::retryable_msg("downstream unavailable"));
        }
        Ok(())
    }
}

struct Harness<A> {
    node: RetryableNode<String, String, A>,
    clock: ManualClock,
    channel: Channel,
}

impl<A> Harness<A>
where
    A: RetryableAction<String, String> + Clone,
{
    fn new(action: A, config: RetryConfig) -> Self {
        redrive_observability::init();

        let mut builder = TopologyBuilder::new();
        let mut stream: SourceStream<'_, String, String> =
            SourceStream::register(&mut builder, "orders", Arc::new(StringCodec), Arc::new(StringCodec)).unwrap();
        let node = stream.retryable_foreach(action, config).unwrap();

        Self {
            node,
            clock: ManualClock::new(Timestamp::from_millis(1000)),
            channel: Arc::new(InMemoryChannel::new("dead-letters")),
        }
    }

    fn processor(&self) -> Processor<A> {
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        self.node
            .processor(
                0,
                InMemoryKeyValueStore::new(self.node.store_name()),
                self.channel.clone(),
                clock,
            )
            .unwrap()
    }
}

fn record() -> Record<String, String> {
    Record::new("orders", 0, "k1".to_string(), "v1".to_string())
}

fn stored<A>(p: &Processor<A>) -> Vec<redrive_core::Attempt>
where
    A: RetryableAction<String, String>,
{
    p.store()
        .due_before(Timestamp::MAX)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn always_succeeding_action_leaves_nothing_behind() {
    let action = Scripted::new(0, false);
    let h = Harness::new(action.clone(), RetryConfig::default());
    let mut p = h.processor();

    assert_eq!(p.process(&record()).unwrap(), Disposition::Succeeded);
    assert!(p.store().is_empty().unwrap());
    assert!(h.channel.is_empty());
    assert_eq!(action.calls(), 1);
}

#[test]
fn retryable_then_success_is_redriven_once() {
    let action = Scripted::new(1, false);
    let h = Harness::new(action.clone(), RetryConfig::default());
    let mut p = h.processor();

    p.process(&record()).unwrap();
    let pending = stored(&p);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts_count(), 1);
    assert_eq!(pending[0].scheduled_at(), Some(Timestamp::from_millis(1500)));
    assert_eq!(pending[0].time_received(), Timestamp::from_millis(1000));

    h.clock.set(Timestamp::from_millis(1500));
    let report = p.punctuate_now().unwrap();
    assert_eq!(report.drained, 1);
    assert_eq!(report.succeeded, 1);

    assert!(p.store().is_empty().unwrap());
    assert!(h.channel.is_empty());
    assert_eq!(action.calls(), 2);
}

#[test]
fn fatal_failure_is_dead_lettered_once_and_never_stored() {
    let action = Scripted::new(0, true);
    let h = Harness::new(action.clone(), RetryConfig::default());
    let mut p = h.processor();

    assert_eq!(p.process(&record()).unwrap(), Disposition::DeadLettered);
    assert!(p.store().is_empty().unwrap());

    h.clock.set(Timestamp::from_millis(5000));
    assert!(p.punctuate_now().unwrap().is_empty());

    let published = h.channel.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, "orders.1000");

    let envelope: DeadLetterEnvelope = serde_json::from_str(&published[0].value).unwrap();
    assert_eq!(envelope.attempts, "1");
    assert_eq!(envelope.time_received, "1000");
    let message: serde_json::Value = serde_json::from_str(&envelope.message).unwrap();
    assert_eq!(message, serde_json::json!({"key": "k1", "value": "v1"}));
    assert_eq!(action.calls(), 1);
}

#[test]
fn max_attempts_dead_letters_after_the_last_retry() {
    let action = Scripted::new(u32::MAX, false);
    let h = Harness::new(action.clone(), RetryConfig::default().with_max_attempts(2));
    let mut p = h.processor();

    assert!(matches!(p.process(&record()).unwrap(), Disposition::Rescheduled { .. }));

    h.clock.set(Timestamp::from_millis(1500));
    let report = p.punctuate_now().unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert!(p.store().is_empty().unwrap());

    let published = h.channel.published();
    let envelope: DeadLetterEnvelope = serde_json::from_str(&published[0].value).unwrap();
    assert_eq!(envelope.attempts, "2");
    assert_eq!(action.calls(), 2);
}

#[test]
fn unbounded_retries_keep_counting() {
    let action = Scripted::new(u32::MAX, false);
    let h = Harness::new(action.clone(), RetryConfig::default());
    let mut p = h.processor();
    p.process(&record()).unwrap();

    for tick in 1..=5 {
        h.clock.advance(std::time::Duration::from_millis(500));
        assert_eq!(p.punctuate_now().unwrap().rescheduled, 1, "tick {tick}");
    }

    let pending = stored(&p);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts_count(), 6);
    assert!(h.channel.is_empty());
}

/// Store shared with the action so it can observe the store mid-invocation.
#[derive(Clone)]
struct SharedStore(Arc<Mutex<InMemoryKeyValueStore>>);

impl KeyValueStore for SharedStore {
    fn name(&self) -> &str {
        "RETRYABLE-FOREACH-0000000001-RETRIES_STORE"
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.0.lock().map_err(|_| StoreError::Poisoned(self.name().into()))?.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.0.lock().map_err(|_| StoreError::Poisoned(self.name().into()))?.delete(key)
    }

    fn range_to(&self, upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.0.lock().map_err(|_| StoreError::Poisoned(self.name().into()))?.range_to(upper)
    }
}

/// Entries in the store seen by each invocation, for the given delivery mode.
fn store_sizes_seen_by_action(delivery: DeliveryMode) -> Vec<usize> {
    let shared = SharedStore(Arc::new(Mutex::new(InMemoryKeyValueStore::new("unused"))));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let observer = shared.clone();
    let log = seen.clone();
    let action = move |_: &String, _: &String| {
        let size = observer.0.lock().unwrap().len();
        let mut log = log.lock().unwrap();
        log.push(size);
        if log.len() == 1 {
            Err(ActionError::retryable_msg("busy"))
        } else {
            Ok(())
        }
    };

    let h = Harness::new(action, RetryConfig::default().with_delivery(delivery));
    let clock: Arc<dyn Clock> = Arc::new(h.clock.clone());
    let mut p = h.node.processor(0, shared.clone(), h.channel.clone(), clock).unwrap();

    p.process(&record()).unwrap();
    h.clock.set(Timestamp::from_millis(1500));
    assert_eq!(p.punctuate_now().unwrap().succeeded, 1);
    assert_eq!(shared.0.lock().unwrap().len(), 0);

    seen.lock().unwrap().clone()
}

#[test]
fn at_least_once_keeps_the_entry_while_the_action_runs() {
    assert_eq!(store_sizes_seen_by_action(DeliveryMode::AtLeastOnce), vec![0, 1]);
}

#[test]
fn at_most_once_removes_the_entry_before_invoking() {
    assert_eq!(store_sizes_seen_by_action(DeliveryMode::AtMostOnce), vec![0, 0]);
}

#[test]
fn registration_describes_the_retry_subgraph() {
    let mut builder = TopologyBuilder::new();
    let mut stream: SourceStream<'_, String, String> =
        SourceStream::register(&mut builder, "orders", Arc::new(StringCodec), Arc::new(StringCodec)).unwrap();
    let first = stream.retryable_foreach(Scripted::new(0, false), RetryConfig::default()).unwrap();
    let second = stream.retryable_foreach(Scripted::new(0, false), RetryConfig::default()).unwrap();
    let topology = builder.build();

    let retry_nodes = topology.retry_nodes();
    assert_eq!(retry_nodes.len(), 2);
    assert_ne!(first.store_name(), second.store_name());

    for node in [&first, &second] {
        assert_eq!(node.store_name(), format!("{}-RETRIES_STORE", node.name()));
        assert_eq!(topology.store_owner(node.store_name()), Some(node.name()));

        let successors = topology.successors_of(node.name());
        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].name, node.dead_letter_node());
        assert!(node.dead_letter_node().starts_with("RETRYABLE-DEAD_LETTER_PUBLISHER-"));
        assert_eq!(
            successors[0].kind,
            NodeKind::Sink {
                channel: "dead-letters".to_string()
            }
        );
    }
}

#[test]
fn store_survives_processor_restart() {
    let action = Scripted::new(1, false);
    let h = Harness::new(action.clone(), RetryConfig::default());
    let mut p = h.processor();
    p.process(&record()).unwrap();

    // Same store contents, new processor: the pending retry is still due.
    let kv = p.into_store().into_inner();
    assert_eq!(kv.len(), 1);
    let clock: Arc<dyn Clock> = Arc::new(h.clock.clone());
    let mut restarted = h.node.processor(0, kv, h.channel.clone(), clock).unwrap();

    h.clock.set(Timestamp::from_millis(1500));
    assert_eq!(restarted.punctuate_now().unwrap().succeeded, 1);
    assert!(restarted.store().inner().range_to(&[0xff; 16]).unwrap().is_empty());
    assert_eq!(action.calls(), 2);
}
