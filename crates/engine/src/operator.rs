//! `retryable_foreach` operator for any [`StreamHandle`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use redrive_core::{Clock, Codec};
use redrive_stream::{NodeKind, OutputChannel, OutputRecord, StreamHandle, TopologyBuilder, TopologyError};

use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use crate::invoker::{ActionInvoker, RetryableAction};
use crate::processor::RetryableForeachProcessor;
use crate::store::{AttemptStore, KeyValueStore};

pub const RETRYABLE_FOREACH_PREFIX: &str = "RETRYABLE-FOREACH-";
pub const RETRIES_STORE_SUFFIX: &str = "-RETRIES_STORE";
pub const DEAD_LETTER_PUBLISHER_PREFIX: &str = "RETRYABLE-DEAD_LETTER_PUBLISHER-";

/// Adds `retryable_foreach` to every stream handle.
pub trait RetryableForeachExt<K, V>: StreamHandle<K, V> {
    /// Register a retryable terminal operation under a generated name.
    fn retryable_foreach<A>(&mut self, action: A, config: RetryConfig) -> EngineResult<RetryableNode<K, V, A>>
    where
        A: RetryableAction<K, V> + Clone,
    {
        let name = self.topology().new_node_name(RETRYABLE_FOREACH_PREFIX);
        self.retryable_foreach_named(action, name, config)
    }

    /// Register a retryable terminal operation named `name`.
    ///
    /// Adds the retry node as a child of this stream's node, its retry store,
    /// and a dead-letter publisher node downstream of it.
    fn retryable_foreach_named<A>(
        &mut self,
        action: A,
        name: impl Into<String>,
        config: RetryConfig,
    ) -> EngineResult<RetryableNode<K, V, A>>
    where
        A: RetryableAction<K, V> + Clone,
    {
        config.validate()?;
        let name = name.into();

        if self.repartition_required() {
            warn!(node = %name, parent = self.node_name(), "key-changing stream is not repartitioned before retries");
        }

        let parent = self.node_name().to_string();
        let store_name = config
            .store_name
            .clone()
            .unwrap_or_else(|| format!("{name}{RETRIES_STORE_SUFFIX}"));
        let key_codec = self.key_codec();
        let value_codec = self.value_codec();
        let source_topic = self.source_topic().to_string();

        let builder = self.topology();
        let dead_letter_node = builder.new_node_name(DEAD_LETTER_PUBLISHER_PREFIX);
        ensure_registrable(builder, &parent, &name, &store_name, &dead_letter_node)?;

        builder.add_processor(name.clone(), NodeKind::Retryable, &parent)?;
        builder.add_state_store(store_name.clone(), &name)?;
        builder.add_sink(dead_letter_node.clone(), config.dead_letter_channel.clone(), &name)?;

        debug!(node = %name, store = %store_name, dead_letter_node = %dead_letter_node, "registered retryable foreach");
        Ok(RetryableNode {
            name,
            store_name,
            dead_letter_node,
            source_topic,
            key_codec,
            value_codec,
            action,
            config,
        })
    }
}

impl<K, V, T> RetryableForeachExt<K, V> for T where T: StreamHandle<K, V> + ?Sized {}

/// Checks every name a registration claims, so a rejected registration
/// leaves the builder unchanged.
fn ensure_registrable(
    builder: &TopologyBuilder,
    parent: &str,
    node: &str,
    store: &str,
    dead_letter_node: &str,
) -> Result<(), TopologyError> {
    if !builder.contains_node(parent) {
        return Err(TopologyError::UnknownParent(parent.to_string()));
    }
    for name in [node, dead_letter_node] {
        if builder.contains_node(name) {
            return Err(TopologyError::DuplicateNode(name.to_string()));
        }
    }
    if node == dead_letter_node {
        return Err(TopologyError::DuplicateNode(node.to_string()));
    }
    if builder.contains_store(store) {
        return Err(TopologyError::DuplicateStore(store.to_string()));
    }
    Ok(())
}

/// A registered retryable node.
///
/// Holds what each partition needs to build its own processor.
pub struct RetryableNode<K, V, A> {
    name: String,
    store_name: String,
    dead_letter_node: String,
    source_topic: String,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    action: A,
    config: RetryConfig,
}

impl<K, V, A> RetryableNode<K, V, A>
where
    K: Serialize,
    V: Serialize,
    A: RetryableAction<K, V> + Clone,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn dead_letter_node(&self) -> &str {
        &self.dead_letter_node
    }

    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Build the processor for `partition` over that partition's store.
    ///
    /// The store must be the one registered for this node.
    pub fn processor<S, C>(
        &self,
        partition: u32,
        kv: S,
        channel: C,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<RetryableForeachProcessor<K, V, A, S, C>>
    where
        S: KeyValueStore,
        C: OutputChannel<OutputRecord>,
    {
        if kv.name() != self.store_name {
            return Err(EngineError::config(format!(
                "node '{}' expects store '{}', got '{}'",
                self.name,
                self.store_name,
                kv.name()
            )));
        }
        if channel.name() != self.config.dead_letter_channel {
            debug!(
                node = %self.name,
                configured = %self.config.dead_letter_channel,
                channel = channel.name(),
                "dead-letter channel name differs from configuration"
            );
        }

        let store = AttemptStore::open(kv)?;
        let invoker = ActionInvoker::new(self.key_codec.clone(), self.value_codec.clone(), self.action.clone());
        Ok(RetryableForeachProcessor::new(
            self.name.clone(),
            partition,
            &self.config,
            store,
            invoker,
            channel,
            clock,
        ))
    }
}

impl<K, V, A> core::fmt::Debug for RetryableNode<K, V, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryableNode")
            .field("name", &self.name)
            .field("store_name", &self.store_name)
            .field("dead_letter_node", &self.dead_letter_node)
            .field("source_topic", &self.source_topic)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
