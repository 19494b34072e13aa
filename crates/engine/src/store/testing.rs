//! Store double whose writes can be made to fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use redrive_core::StoreError;

use super::kv::{InMemoryKeyValueStore, KeyValueStore};

/// In-memory store that rejects `put` and `delete` while the shared switch
/// is on. Reads always succeed.
#[derive(Debug, Clone)]
pub(crate) struct FaultyStore {
    inner: InMemoryKeyValueStore,
    failing: Arc<AtomicBool>,
}

impl FaultyStore {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            inner: InMemoryKeyValueStore::new(name),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Switch that stays valid after the store is moved into a processor.
    pub(crate) fn switch(&self) -> Arc<AtomicBool> {
        self.failing.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::io(self.inner.name(), "device unavailable"));
        }
        Ok(())
    }
}

impl KeyValueStore for FaultyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key)
    }

    fn range_to(&self, upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.inner.range_to(upper)
    }
}
