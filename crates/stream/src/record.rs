use serde::{Deserialize, Serialize};

/// A record delivered by the host stream engine to one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<K, V> {
    pub topic: String,
    pub partition: u32,
    pub key: K,
    pub value: V,
}

impl<K, V> Record<K, V> {
    pub fn new(topic: impl Into<String>, partition: u32, key: K, value: V) -> Self {
        Self {
            topic: topic.into(),
            partition,
            key,
            value,
        }
    }
}

/// A string-keyed, string-valued record written to an output channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub key: String,
    pub value: String,
}

impl OutputRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Marks messages that belong to a single partition.
///
/// Partition workers use this to refuse records routed to the wrong
/// partition, since each partition owns its own retry store.
pub trait PartitionScoped {
    fn partition(&self) -> u32;
}

impl<K, V> PartitionScoped for Record<K, V> {
    fn partition(&self) -> u32 {
        self.partition
    }
}
