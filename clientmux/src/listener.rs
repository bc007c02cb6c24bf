//! Listener registry: long-lived update subscriptions with fan-out and GC
//!
//! A [`Listener`] is the consumer's half; the [`ListenerStore`] keeps a
//! [`ListenerEntry`] per listener with the sending half and a shared liveness
//! flag. Entries go inactive when the consumer closes or drops its handle, or
//! when fan-out gives up on a consumer that stopped draining its buffer.
//! Inactive entries are skipped and removed by the next [`ListenerStore::gc`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};

use crate::update::Update;

/// Buffer size of each listener's update channel
pub const DEFAULT_LISTENER_CAPACITY: usize = 1000;

pub type ListenerId = u64;

/// What fan-out does when a listener's buffer is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FanOutPolicy {
    /// Never wait: a full buffer deactivates the listener immediately
    #[default]
    Drop,

    /// Wait up to `max_wait_ms` for buffer space, then deactivate
    Block {
        #[serde(rename = "max-wait-ms")]
        max_wait_ms: u64,
    },
}

/// Why a push to a listener failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Buffer full under [`FanOutPolicy::Drop`]
    Full,
    /// Buffer stayed full for the whole [`FanOutPolicy::Block`] window
    Stalled,
    /// Consumer handle is gone
    Closed,
}

/// Registry-side view of one listener
#[derive(Debug)]
pub struct ListenerEntry {
    id: ListenerId,
    active: Arc<AtomicBool>,
    tx: mpsc::Sender<Update>,
}

impl ListenerEntry {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    async fn push(&self, update: Update, policy: FanOutPolicy) -> Result<(), Eviction> {
        match policy {
            FanOutPolicy::Drop => self.tx.try_send(update).map_err(|e| match e {
                TrySendError::Full(_) => Eviction::Full,
                TrySendError::Closed(_) => Eviction::Closed,
            }),
            FanOutPolicy::Block { max_wait_ms } => {
                match tokio::time::timeout(Duration::from_millis(max_wait_ms), self.tx.send(update)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(Eviction::Closed),
                    Err(_) => Err(Eviction::Stalled),
                }
            }
        }
    }
}

/// Consumer handle receiving every update decoded for its client
///
/// The stream is not restartable: after [`Listener::close`] (or eviction)
/// only already-buffered updates are returned, then `None`.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    active: Arc<AtomicBool>,
    rx: mpsc::Receiver<Update>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Receive the next update
    ///
    /// Returns `None` once the listener is inactive and its buffer is drained.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }

    /// Receive an update if one is buffered
    pub fn try_recv(&mut self) -> Option<Update> {
        match self.rx.try_recv() {
            Ok(update) => Some(update),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stop receiving updates
    pub fn close(&mut self) {
        debug!(listener_id = self.id, "Listener::close: called");
        self.active.store(false, Ordering::Release);
        self.rx.close();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub evicted: usize,
    pub inactive: usize,
}

impl FanOutReport {
    /// Whether the pass saw an inactive listener and the store should be collected
    pub fn needs_gc(&self) -> bool {
        self.inactive > 0
    }
}

/// Set of listeners for one client
#[derive(Debug, Default)]
pub struct ListenerStore {
    entries: RwLock<Vec<Arc<ListenerEntry>>>,
    next_id: AtomicU64,
}

impl ListenerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active listener with a buffer of `capacity` updates
    pub fn add(&self, capacity: usize) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(listener_id = id, capacity, "ListenerStore::add: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let active = Arc::new(AtomicBool::new(true));

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(ListenerEntry {
                id,
                active: Arc::clone(&active),
                tx,
            }));

        Listener { id, active, rx }
    }

    /// Snapshot of the current entries, safe to iterate while others add or collect
    pub fn listeners(&self) -> Vec<Arc<ListenerEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Deliver `update` to every active listener
    pub async fn fan_out(&self, update: &Update, policy: FanOutPolicy) -> FanOutReport {
        let mut report = FanOutReport::default();
        for entry in self.listeners() {
            if !entry.is_active() {
                report.inactive += 1;
                continue;
            }
            match entry.push(update.clone(), policy).await {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!(listener_id = entry.id, ?reason, "Deactivating listener");
                    entry.deactivate();
                    report.evicted += 1;
                    report.inactive += 1;
                }
            }
        }
        report
    }

    /// Remove inactive entries; returns how many were removed
    pub fn gc(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.is_active());
        let removed = before - entries.len();
        debug!(removed, remaining = entries.len(), "ListenerStore::gc: collected");
        removed
    }

    /// Number of registered entries, active or not
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries still active
    pub fn active_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.is_active())
            .count()
    }
}
