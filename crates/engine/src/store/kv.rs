//! Ordered key-value store boundary.

use std::collections::BTreeMap;
use std::ops::Bound;

use redrive_core::StoreError;

/// Byte-ordered key-value store supplied by the host.
///
/// Each partition owns its instance exclusively, so methods take `&mut self`
/// for writes and implementations need no internal locking. Durability and
/// replication are the implementation's concern.
pub trait KeyValueStore: Send {
    /// Store identifier, used for wiring and in logs.
    fn name(&self) -> &str;

    /// Insert or overwrite.
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove. Deleting an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Every entry with `key <= upper`, ascending by key.
    fn range_to(&self, upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

impl<S> KeyValueStore for Box<S>
where
    S: KeyValueStore + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn range_to(&self, upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        (**self).range_to(upper)
    }
}

/// In-memory ordered store.
///
/// Intended for tests/dev. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    name: String,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKeyValueStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn range_to(&self, upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .entries
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(upper)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
