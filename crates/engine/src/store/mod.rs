//! Retry store: an ordered key-value boundary and the attempt queue on top.

pub mod attempts;
pub mod kv;

pub use attempts::{AttemptStore, DueAttempts};
pub use kv::{InMemoryKeyValueStore, KeyValueStore};

#[cfg(test)]
pub(crate) mod testing;
