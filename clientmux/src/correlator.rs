//! Response correlation: one-shot waiters keyed by `@extra`
//!
//! Each in-flight `send` owns a [`Waiter`]. The waiter's map entry is created
//! before the request is transmitted and removed when the waiter is dropped,
//! so every exit path (response, timeout, transmit failure, cancellation)
//! leaves the map clean.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::MuxError;
use crate::message::{ClientId, Message};

/// Concurrent map from correlation token to the waiting `send`
#[derive(Clone, Default)]
pub struct Correlator {
    waiters: Arc<DashMap<String, oneshot::Sender<Message>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `extra`
    ///
    /// Fails if a waiter for the same token is already in flight.
    pub fn register(&self, extra: &str) -> Result<Waiter, MuxError> {
        debug!(%extra, "Correlator::register: called");
        match self.waiters.entry(extra.to_string()) {
            Entry::Occupied(_) => Err(MuxError::DuplicateExtra {
                extra: extra.to_string(),
            }),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(Waiter {
                    extra: extra.to_string(),
                    rx,
                    waiters: Arc::clone(&self.waiters),
                })
            }
        }
    }

    /// Hand a message to the waiter registered for its token
    ///
    /// Returns false when the message carries no token or nobody is waiting
    /// for it any more. Never blocks.
    pub fn deliver(&self, message: Message) -> bool {
        let Some(extra) = message.token() else {
            return false;
        };
        match self.waiters.remove(extra) {
            Some((extra, tx)) => {
                trace!(%extra, "Correlator::deliver: matched waiter");
                tx.send(message).is_ok()
            }
            None => {
                trace!(%extra, "Correlator::deliver: no waiter, dropping");
                false
            }
        }
    }

    /// Number of in-flight waiters
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Whether a waiter for `extra` is registered
    pub fn contains(&self, extra: &str) -> bool {
        self.waiters.contains_key(extra)
    }

    /// Drop every waiter; their `wait` calls return `ChannelClosed`
    pub fn clear(&self) -> usize {
        let pending = self.waiters.len();
        self.waiters.clear();
        pending
    }
}

/// Receiving side of one correlation entry
///
/// Dropping the waiter removes its entry from the correlator.
pub struct Waiter {
    extra: String,
    rx: oneshot::Receiver<Message>,
    waiters: Arc<DashMap<String, oneshot::Sender<Message>>>,
}

impl Waiter {
    pub fn extra(&self) -> &str {
        &self.extra
    }

    /// Wait up to `timeout` for the matching response
    pub async fn wait(mut self, timeout: Duration) -> Result<Message, MuxError> {
        debug!(extra = %self.extra, ?timeout, "Waiter::wait: called");
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(MuxError::ChannelClosed("response waiter")),
            Err(_) => Err(MuxError::Timeout(timeout)),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // Only our own entry: a later waiter may already hold the same token
        self.rx.close();
        self.waiters.remove_if(&self.extra, |_, tx| tx.is_closed());
    }
}

/// Drain a client's catcher queue into its correlator until the queue closes
pub async fn catch(client_id: ClientId, mut catcher: mpsc::Receiver<Message>, correlator: Correlator) {
    debug!(client_id, "catch: started");
    while let Some(message) = catcher.recv().await {
        correlator.deliver(message);
    }
    debug!(client_id, "catch: catcher queue closed");
}
