//! Client registry shared by the receive loop
//!
//! Maps client ids to the routing state the receive loop needs. One lock
//! guards both the map and the transport the receive loop polls; routing
//! lookups take it for reading, client construction for writing.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::error::MuxError;
use crate::listener::{FanOutPolicy, ListenerStore};
use crate::message::{ClientId, Message};
use crate::transport::Transport;
use crate::update::Decoder;

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

/// Everything the receive loop needs to deliver a message to one client
pub struct ClientRoute {
    pub(crate) client_id: ClientId,
    pub(crate) catcher: mpsc::Sender<Message>,
    pub(crate) listeners: Arc<ListenerStore>,
    pub(crate) decoder: Arc<dyn Decoder>,
    pub(crate) fan_out: FanOutPolicy,
}

impl ClientRoute {
    pub fn new(
        client_id: ClientId,
        catcher: mpsc::Sender<Message>,
        listeners: Arc<ListenerStore>,
        decoder: Arc<dyn Decoder>,
        fan_out: FanOutPolicy,
    ) -> Self {
        Self {
            client_id,
            catcher,
            listeners,
            decoder,
            fan_out,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }
}

#[derive(Default)]
struct RegistryState {
    /// Set by the first registration; the receive loop polls only this transport
    transport: Option<Arc<dyn Transport>>,
    clients: HashMap<ClientId, Arc<ClientRoute>>,
}

/// Routing table for all clients served by one receive loop
///
/// Entries are write-once and are never removed, including after the
/// client is stopped. Every client must share the transport of the first
/// one registered, since that is the only transport the loop reads from.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an isolated registry with its own receive loop
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used when none is supplied
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Insert a client route bound to `transport`
    ///
    /// Returns `Ok(true)` exactly once per registry: the caller that gets
    /// it is responsible for starting the receive loop on `transport`.
    /// Fails with [`MuxError::ForeignTransport`] if the loop polls a
    /// different transport, and with [`MuxError::DuplicateClient`] if the id
    /// is already routed to another client.
    pub async fn register(&self, route: Arc<ClientRoute>, transport: &Arc<dyn Transport>) -> Result<bool, MuxError> {
        let client_id = route.client_id;
        let mut state = self.state.write().await;

        if let Some(polled) = &state.transport
            && !Arc::ptr_eq(polled, transport)
        {
            return Err(MuxError::ForeignTransport { client_id });
        }
        if state.clients.contains_key(&client_id) {
            return Err(MuxError::DuplicateClient { client_id });
        }

        state.clients.insert(client_id, route);
        let start_loop = state.transport.is_none();
        if start_loop {
            state.transport = Some(Arc::clone(transport));
        }
        debug!(client_id, start_loop, clients = state.clients.len(), "Registry::register: registered");
        Ok(start_loop)
    }

    pub async fn lookup(&self, client_id: ClientId) -> Option<Arc<ClientRoute>> {
        self.state.read().await.clients.get(&client_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_started(&self) -> bool {
        self.state.read().await.transport.is_some()
    }
}
