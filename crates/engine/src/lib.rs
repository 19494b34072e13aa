//! `redrive-engine`: retry scheduling and dead-letter routing for stream
//! processors.
//!
//! A record whose action fails transiently is captured in a partition-local
//! [`AttemptStore`] and re-driven on a periodic tick. A record whose action
//! fails permanently is wrapped in a [`DeadLetterEnvelope`] and published to
//! the dead-letter channel.

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod invoker;
pub mod operator;
pub mod policy;
pub mod processor;
pub mod scheduler;
pub mod store;
pub mod worker;


pub use config::{DeliveryMode, RetryConfig};
pub use dead_letter::{DeadLetterEnvelope, DeadLetterRouter, EnvelopeError, RouteOutcome};
pub use error::{EngineError, EngineResult};
pub use invoker::{ActionError, ActionInvoker, Outcome, RetryableAction};
pub use operator::{RetryableForeachExt, RetryableNode};
pub use policy::{BackoffStrategy, RetryPolicy};
pub use processor::{ProcessorStats, RetryableForeachProcessor};
pub use scheduler::{Disposition, RetryScheduler, TickReport};
pub use store::{AttemptStore, DueAttempts, InMemoryKeyValueStore, KeyValueStore};
pub use worker::{PartitionHandle, PartitionWorker};
