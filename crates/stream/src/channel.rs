//! Named output channels (publish/subscribe, mechanics only).
//!
//! The dead-letter router writes to an [`OutputChannel`]. The channel is the
//! host's concern: it may be a broker topic, a file, or the in-memory
//! fan-out used in tests. The engine only needs `publish` to either accept the
//! record or return an error it can surface to the partition.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to everything published on a channel after it was created.
///
/// Designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Downstream sink for records leaving the engine.
pub trait OutputChannel<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Channel identifier, used in logs.
    fn name(&self) -> &str;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, C> OutputChannel<M> for Arc<C>
where
    C: OutputChannel<M> + ?Sized,
{
    type Error = C::Error;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
