//! Processing graph description.
//!
//! The host engine executes topologies; this module only records what the
//! operators registered: nodes, their parent/child edges and the state
//! stores each node owns. Names are unique across the whole graph.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("node '{0}' is already registered")]
    DuplicateNode(String),

    #[error("unknown parent node '{0}'")]
    UnknownParent(String),

    #[error("state store '{0}' is already registered")]
    DuplicateStore(String),

    #[error("state store '{store}' refers to unknown node '{node}'")]
    UnknownStoreOwner { store: String, node: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Source { topic: String },
    Processor,
    /// Processor wrapped with retry scheduling and dead-letter routing.
    Retryable,
    Sink { channel: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    pub name: String,
    pub kind: NodeKind,
    pub predecessors: Vec<String>,
    pub successors: Vec<String>,
    pub stores: Vec<String>,
}

impl NodeDescription {
    fn new(name: String, kind: NodeKind) -> Self {
        Self {
            name,
            kind,
            predecessors: Vec::new(),
            successors: Vec::new(),
            stores: Vec::new(),
        }
    }
}

/// Mutable graph under construction.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    nodes: Vec<NodeDescription>,
    stores: BTreeMap<String, String>,
    counter: u64,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a unique node name: `prefix` followed by a zero-padded
    /// builder-wide counter.
    pub fn new_node_name(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}{:010}", self.counter);
        self.counter = self.counter.saturating_add(1);
        name
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn contains_store(&self, store: &str) -> bool {
        self.stores.contains_key(store)
    }

    pub fn add_source(&mut self, name: impl Into<String>, topic: impl Into<String>) -> Result<(), TopologyError> {
        let name = name.into();
        self.ensure_new(&name)?;
        self.nodes.push(NodeDescription::new(
            name,
            NodeKind::Source {
                topic: topic.into(),
            },
        ));
        Ok(())
    }

    pub fn add_processor(
        &mut self,
        name: impl Into<String>,
        kind: NodeKind,
        parent: &str,
    ) -> Result<(), TopologyError> {
        let name = name.into();
        self.ensure_new(&name)?;
        let parent_idx = self
            .position(parent)
            .ok_or_else(|| TopologyError::UnknownParent(parent.to_string()))?;

        debug!(node = %name, parent, kind = ?kind, "registering node");
        let mut node = NodeDescription::new(name.clone(), kind);
        node.predecessors.push(parent.to_string());
        if let Some(p) = self.nodes.get_mut(parent_idx) {
            p.successors.push(name);
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_sink(
        &mut self,
        name: impl Into<String>,
        channel: impl Into<String>,
        parent: &str,
    ) -> Result<(), TopologyError> {
        self.add_processor(
            name,
            NodeKind::Sink {
                channel: channel.into(),
            },
            parent,
        )
    }

    pub fn add_state_store(&mut self, store: impl Into<String>, owner: &str) -> Result<(), TopologyError> {
        let store = store.into();
        if self.contains_store(&store) {
            return Err(TopologyError::DuplicateStore(store));
        }
        let idx = self
            .position(owner)
            .ok_or_else(|| TopologyError::UnknownStoreOwner {
                store: store.clone(),
                node: owner.to_string(),
            })?;
        if let Some(node) = self.nodes.get_mut(idx) {
            node.stores.push(store.clone());
        }
        debug!(store = %store, owner, "registering state store");
        self.stores.insert(store, owner.to_string());
        Ok(())
    }

    pub fn build(self) -> Topology {
        Topology {
            nodes: self.nodes,
            stores: self.stores,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    fn ensure_new(&self, name: &str) -> Result<(), TopologyError> {
        if self.contains_node(name) {
            return Err(TopologyError::DuplicateNode(name.to_string()));
        }
        Ok(())
    }
}

/// Immutable processing graph.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeDescription>,
    stores: BTreeMap<String, String>,
}

impl Topology {
    /// Nodes in registration order.
    pub fn nodes(&self) -> &[NodeDescription] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&NodeDescription> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn retry_nodes(&self) -> Vec<&NodeDescription> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Retryable))
            .collect()
    }

    /// Store names in ascending order.
    pub fn state_stores(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }

    pub fn store_owner(&self, store: &str) -> Option<&str> {
        self.stores.get(store).map(String::as_str)
    }

    pub fn successors_of(&self, name: &str) -> Vec<&NodeDescription> {
        self.node(name)
            .map(|n| n.successors.iter().filter_map(|s| self.node(s)).collect())
            .unwrap_or_default()
    }
}

impl core::fmt::Display for Topology {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Source { topic } => writeln!(f, "Source: {} (topic: {topic})", node.name)?,
                NodeKind::Processor => writeln!(f, "Processor: {} (stores: {:?})", node.name, node.stores)?,
                NodeKind::Retryable => writeln!(f, "Retryable: {} (stores: {:?})", node.name, node.stores)?,
                NodeKind::Sink { channel } => writeln!(f, "Sink: {} (channel: {channel})", node.name)?,
            }
            for s in &node.successors {
                writeln!(f, "  --> {s}")?;
            }
        }
        Ok(())
    }
}
