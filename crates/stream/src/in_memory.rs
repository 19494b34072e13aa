//! In-memory output channel for tests/dev.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};

use crate::channel::{OutputChannel, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryChannelError {
    /// Publish failed due to internal lock poisoning.
    #[error("channel lock poisoned")]
    Poisoned,
    /// The channel was closed with [`InMemoryChannel::close`].
    #[error("channel '{0}' is closed")]
    Closed(String),
}

/// In-memory pub/sub channel.
///
/// - No IO / no async
/// - Best-effort fan-out to live subscribers
/// - Keeps every published message so tests can inspect the full history
#[derive(Debug)]
pub struct InMemoryChannel<M> {
    name: String,
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
    history: Mutex<Vec<M>>,
    closed: AtomicBool,
}

impl<M> InMemoryChannel<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Make every subsequent publish fail with [`InMemoryChannelError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Number of messages accepted so far.
    pub fn len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Clone> InMemoryChannel<M> {
    /// Snapshot of every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<M> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl<M> OutputChannel<M> for InMemoryChannel<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryChannelError;

    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(InMemoryChannelError::Closed(self.name.clone()));
        }

        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryChannelError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        self.history
            .lock()
            .map_err(|_| InMemoryChannelError::Poisoned)?
            .push(message);

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}
