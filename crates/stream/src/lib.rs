//! `redrive-stream`: the surface shared with the host stream engine.
//!
//! Records in, output channels out, and the graph that operators register
//! themselves into. Execution of the graph is the host's job.

pub mod channel;
pub mod handle;
pub mod in_memory;
pub mod record;
pub mod topology;

pub use channel::{OutputChannel, Subscription};
pub use handle::{SourceStream, StreamHandle};
pub use in_memory::{InMemoryChannel, InMemoryChannelError};
pub use record::{OutputRecord, PartitionScoped, Record};
pub use topology::{NodeDescription, NodeKind, Topology, TopologyBuilder, TopologyError};
