//! Capability interface for stream-like values.
//!
//! Operators are defined against [`StreamHandle`] rather than a concrete
//! stream type: anything that can hand out its codecs, say whether it needs
//! repartitioning and expose the graph it belongs to can be extended with new
//! operators. Everything an operator needs is asked for explicitly.

use std::sync::Arc;

use redrive_core::Codec;

use crate::topology::{TopologyBuilder, TopologyError};

pub trait StreamHandle<K, V> {
    /// Name of the graph node this stream reads from.
    fn node_name(&self) -> &str;

    /// Topic the records originally came from.
    fn source_topic(&self) -> &str;

    fn key_codec(&self) -> Arc<dyn Codec<K>>;

    fn value_codec(&self) -> Arc<dyn Codec<V>>;

    /// Whether keys may have changed since the source, so records must be
    /// repartitioned before any keyed state is used.
    fn repartition_required(&self) -> bool;

    /// Graph-registration hook.
    fn topology(&mut self) -> &mut TopologyBuilder;
}

/// Stream read directly from a source topic.
pub struct SourceStream<'a, K, V> {
    builder: &'a mut TopologyBuilder,
    node_name: String,
    topic: String,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    repartition_required: bool,
}

impl<'a, K, V> SourceStream<'a, K, V> {
    /// Register a source node for `topic` and return a stream over it.
    pub fn register(
        builder: &'a mut TopologyBuilder,
        topic: impl Into<String>,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Result<Self, TopologyError> {
        let topic = topic.into();
        let node_name = builder.new_node_name("SOURCE-");
        builder.add_source(node_name.clone(), topic.clone())?;
        Ok(Self {
            builder,
            node_name,
            topic,
            key_codec,
            value_codec,
            repartition_required: false,
        })
    }

    pub fn with_repartition_required(mut self, required: bool) -> Self {
        self.repartition_required = required;
        self
    }
}

impl<K, V> StreamHandle<K, V> for SourceStream<'_, K, V> {
    fn node_name(&self) -> &str {
        &self.node_name
    }

    fn source_topic(&self) -> &str {
        &self.topic
    }

    fn key_codec(&self) -> Arc<dyn Codec<K>> {
        self.key_codec.clone()
    }

    fn value_codec(&self) -> Arc<dyn Codec<V>> {
        self.value_codec.clone()
    }

    fn repartition_required(&self) -> bool {
        self.repartition_required
    }

    fn topology(&mut self) -> &mut TopologyBuilder {
        self.builder
    }
}
