//! Dedicated thread per partition.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use redrive_stream::{OutputChannel, OutputRecord, PartitionScoped, Record};

use crate::error::{EngineError, EngineResult};
use crate::invoker::RetryableAction;
use crate::processor::{ProcessorStats, RetryableForeachProcessor};
use crate::store::KeyValueStore;

/// Handle to feed and stop a running partition worker.
#[derive(Debug)]
pub struct PartitionHandle<K, V> {
    name: String,
    records: Option<mpsc::Sender<Record<K, V>>>,
    join: Option<thread::JoinHandle<EngineResult<()>>>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl<K, V> PartitionHandle<K, V> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a record for the partition.
    ///
    /// Fails once the worker has stopped, for example after a store failure.
    pub fn send(&self, record: Record<K, V>) -> EngineResult<()> {
        self.records
            .as_ref()
            .ok_or_else(|| EngineError::WorkerStopped(self.name.clone()))?
            .send(record)
            .map_err(|_| EngineError::WorkerStopped(self.name.clone()))
    }

    /// Statistics as of the last processed record or tick.
    pub fn stats(&self) -> ProcessorStats {
        match self.stats.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Stop the worker after it drains already-queued records.
    ///
    /// Returns the final statistics, or the error that stopped the partition.
    pub fn shutdown(mut self) -> EngineResult<ProcessorStats> {
        self.records.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| EngineError::WorkerPanicked(self.name.clone()))??;
        }
        Ok(self.stats())
    }
}

impl<K, V> Drop for PartitionHandle<K, V> {
    fn drop(&mut self) {
        self.records.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Runs one partition's processor on its own thread.
///
/// Records and ticks are handled on that thread only, so the processor needs
/// no locking. Ticks fire on wall-clock time whether or not records arrive.
#[derive(Debug)]
pub struct PartitionWorker;

impl PartitionWorker {
    pub fn spawn<K, V, A, S, C>(
        name: impl Into<String>,
        processor: RetryableForeachProcessor<K, V, A, S, C>,
    ) -> EngineResult<PartitionHandle<K, V>>
    where
        K: Serialize + Send + 'static,
        V: Serialize + Send + 'static,
        A: RetryableAction<K, V> + 'static,
        S: KeyValueStore + 'static,
        C: OutputChannel<OutputRecord> + 'static,
    {
        let name = name.into();
        let (records_tx, records_rx) = mpsc::channel::<Record<K, V>>();
        let stats = Arc::new(Mutex::new(processor.stats().clone()));
        let stats_clone = stats.clone();

        let worker_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&worker_name, processor, records_rx, stats_clone))
            .map_err(|e| {
                error!(worker = %name, error = %e, "failed to spawn partition worker thread");
                EngineError::WorkerStopped(name.clone())
            })?;

        Ok(PartitionHandle {
            name,
            records: Some(records_tx),
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<K, V, A, S, C>(
    name: &str,
    mut processor: RetryableForeachProcessor<K, V, A, S, C>,
    records: mpsc::Receiver<Record<K, V>>,
    stats: Arc<Mutex<ProcessorStats>>,
) -> EngineResult<()>
where
    K: Serialize,
    V: Serialize,
    A: RetryableAction<K, V>,
    S: KeyValueStore,
    C: OutputChannel<OutputRecord>,
{
    let partition = processor.partition();
    let tick = processor.tick_interval();
    info!(worker = name, node = processor.node_name(), partition, "partition worker started");

    let mut next_tick = Instant::now() + tick;
    let result = loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        let step = match records.recv_timeout(wait) {
            Ok(record) if record.partition() != partition => {
                warn!(
                    worker = name,
                    partition,
                    record_partition = record.partition(),
                    topic = %record.topic,
                    "record routed to the wrong partition; ignored"
                );
                Ok(())
            }
            Ok(record) => processor.process(&record).map(|_| ()),
            Err(RecvTimeoutError::Timeout) => Ok(()),
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        };
        if let Err(e) = step {
            break Err(e);
        }

        if Instant::now() >= next_tick {
            if let Err(e) = processor.punctuate_now() {
                break Err(e);
            }
            next_tick = Instant::now() + tick;
        }

        if let Ok(mut s) = stats.lock() {
            *s = processor.stats().clone();
        }
    };

    if let Ok(mut s) = stats.lock() {
        *s = processor.stats().clone();
    }

    match &result {
        Ok(()) => info!(worker = name, partition, "partition worker stopped"),
        Err(e) => error!(worker = name, partition, error = %e, "partition worker failed"),
    }
    result
}
