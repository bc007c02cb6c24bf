//! Client: request/response and update subscriptions over a shared transport
//!
//! A client is built with [`ClientBuilder`], which creates the transport
//! binding, starts the client's catch loop, registers it with a
//! [`Registry`] (starting that registry's receive loop if none is running)
//! and only then sends any initial configuration requests.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlator::{self, Correlator};
use crate::error::MuxError;
use crate::extra::{ExtraGenerator, uuid_generator};
use crate::listener::{DEFAULT_LISTENER_CAPACITY, FanOutPolicy, Listener, ListenerStore};
use crate::message::{AddProxyRequest, ClientId, Message, Request, SetLogVerbosityLevelRequest};
use crate::receiver::ReceiveLoop;
use crate::registry::{ClientRoute, Registry};
use crate::transport::Transport;
use crate::update::{Decoder, JsonDecoder};

/// Default wait for a response to `send`
pub const DEFAULT_CATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for each blocking receive call
pub const DEFAULT_UPDATES_TIMEOUT: Duration = Duration::from_secs(60);

/// Default floor between two failed receive calls
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default depth of the catcher queue
pub const DEFAULT_CATCHER_CAPACITY: usize = 1000;

/// Client lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Running,
    Stopped,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Created,
            1 => ClientState::Running,
            _ => ClientState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ClientState::Created => 0,
            ClientState::Running => 1,
            ClientState::Stopped => 2,
        }
    }
}

/// Point-in-time counters for one client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub pending_requests: usize,
    pub active_listeners: usize,
    /// Listener entries still stored, including inactive ones awaiting GC
    pub stored_listeners: usize,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    timeouts: AtomicU64,
}

/// Builder applying client options before any background task starts
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    extra_generator: ExtraGenerator,
    decoder: Arc<dyn Decoder>,
    catch_timeout: Duration,
    updates_timeout: Duration,
    min_poll_interval: Duration,
    fan_out: FanOutPolicy,
    listener_capacity: usize,
    catcher_capacity: usize,
    proxy: Option<AddProxyRequest>,
    log_verbosity: Option<SetLogVerbosityLevelRequest>,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: Registry::global(),
            extra_generator: uuid_generator(),
            decoder: Arc::new(JsonDecoder),
            catch_timeout: DEFAULT_CATCH_TIMEOUT,
            updates_timeout: DEFAULT_UPDATES_TIMEOUT,
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            fan_out: FanOutPolicy::default(),
            listener_capacity: DEFAULT_LISTENER_CAPACITY,
            catcher_capacity: DEFAULT_CATCHER_CAPACITY,
            proxy: None,
            log_verbosity: None,
        }
    }

    /// Apply every setting carried by a [`ClientConfig`]
    pub fn from_config(self, config: &ClientConfig) -> Self {
        debug!(?config, "ClientBuilder::from_config: called");
        self.extra_generator(config.extra.generator())
            .catch_timeout(config.catch_timeout())
            .updates_timeout(config.updates_timeout())
            .min_poll_interval(config.min_poll_interval())
            .fan_out_policy(config.fan_out)
            .listener_capacity(config.listener_capacity)
            .catcher_capacity(config.catcher_capacity)
    }

    /// Use an isolated registry instead of the process-wide one
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn extra_generator(mut self, extra_generator: ExtraGenerator) -> Self {
        self.extra_generator = extra_generator;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn catch_timeout(mut self, timeout: Duration) -> Self {
        self.catch_timeout = timeout;
        self
    }

    /// Receive timeout; only the first client of a registry sets it for the shared loop
    pub fn updates_timeout(mut self, timeout: Duration) -> Self {
        self.updates_timeout = timeout;
        self
    }

    pub fn min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn fan_out_policy(mut self, policy: FanOutPolicy) -> Self {
        self.fan_out = policy;
        self
    }

    pub fn listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity;
        self
    }

    pub fn catcher_capacity(mut self, capacity: usize) -> Self {
        self.catcher_capacity = capacity;
        self
    }

    /// Register a proxy once the client is running
    pub fn proxy(mut self, request: AddProxyRequest) -> Self {
        self.proxy = Some(request);
        self
    }

    /// Set the transport's log verbosity once the client is running
    pub fn log_verbosity(mut self, request: SetLogVerbosityLevelRequest) -> Self {
        self.log_verbosity = Some(request);
        self
    }

    /// Create the binding, start background tasks, then send initial requests
    pub async fn build(self) -> Result<Client, MuxError> {
        let client_id = self.transport.create_client()?;
        debug!(client_id, "ClientBuilder::build: called");

        let (catcher_tx, catcher_rx) = mpsc::channel(self.catcher_capacity.max(1));
        let correlator = Correlator::new();
        let listeners = Arc::new(ListenerStore::new());

        let catch_task = tokio::spawn(correlator::catch(client_id, catcher_rx, correlator.clone()));

        let route = Arc::new(ClientRoute::new(
            client_id,
            catcher_tx,
            Arc::clone(&listeners),
            Arc::clone(&self.decoder),
            self.fan_out,
        ));
        let start_loop = match self.registry.register(route, &self.transport).await {
            Ok(start_loop) => start_loop,
            Err(e) => {
                warn!(client_id, error = %e, "Client registration failed");
                catch_task.abort();
                if let Err(destroy_err) = self.transport.destroy(client_id).await {
                    warn!(client_id, error = %destroy_err, "Failed to destroy unregistered client");
                }
                return Err(e);
            }
        };
        if start_loop {
            ReceiveLoop::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.transport),
                self.updates_timeout,
                self.min_poll_interval,
            )
            .spawn();
        }

        let client = Client {
            inner: Arc::new(ClientInner {
                id: client_id,
                transport: self.transport,
                correlator,
                listeners,
                extra_generator: self.extra_generator,
                catch_timeout: self.catch_timeout,
                listener_capacity: self.listener_capacity,
                state: AtomicU8::new(ClientState::Running.as_u8()),
                catch_task: Mutex::new(Some(catch_task)),
                counters: Counters::default(),
            }),
        };
        info!(client_id, "Client started");

        if let Some(proxy) = &self.proxy
            && let Err(e) = client.add_proxy(proxy).await
        {
            warn!(client_id, error = %e, "Initial proxy request failed");
            client.stop_after_failed_build().await;
            return Err(e);
        }

        if let Some(verbosity) = &self.log_verbosity
            && let Err(e) = client.set_log_verbosity_level(verbosity).await
        {
            warn!(client_id, error = %e, "Initial log verbosity request failed");
            client.stop_after_failed_build().await;
            return Err(e);
        }

        Ok(client)
    }
}

struct ClientInner {
    id: ClientId,
    transport: Arc<dyn Transport>,
    correlator: Correlator,
    listeners: Arc<ListenerStore>,
    extra_generator: ExtraGenerator,
    catch_timeout: Duration,
    listener_capacity: usize,
    state: AtomicU8,
    catch_task: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// Handle to one logical client; cheap to clone
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Send a request and wait for the response carrying its `@extra`
    ///
    /// The request's `extra` is overwritten with a fresh token. Returns
    /// [`MuxError::Timeout`] if no response arrives within the catch timeout.
    pub async fn send(&self, mut request: Request) -> Result<Message, MuxError> {
        let client_id = self.inner.id;
        if self.state() == ClientState::Stopped {
            return Err(MuxError::Stopped { client_id });
        }

        let extra = (self.inner.extra_generator)();
        debug!(client_id, kind = %request.kind, %extra, "Client::send: called");

        let waiter = self.inner.correlator.register(&extra)?;
        request.extra = Some(extra);

        self.inner.transport.send(client_id, &request).await?;
        self.inner.counters.requests_sent.fetch_add(1, Ordering::Relaxed);

        match waiter.wait(self.inner.catch_timeout).await {
            Ok(response) => {
                self.inner.counters.responses_received.fetch_add(1, Ordering::Relaxed);
                Ok(response)
            }
            Err(e) => {
                if e.is_timeout() {
                    self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(client_id, kind = %request.kind, extra = ?request.extra, "Response catching timeout");
                }
                Err(e)
            }
        }
    }

    pub async fn add_proxy(&self, request: &AddProxyRequest) -> Result<Message, MuxError> {
        debug!(client_id = self.inner.id, server = %request.server, port = request.port, "Client::add_proxy: called");
        self.send(Request::try_from(request)?).await
    }

    pub async fn set_log_verbosity_level(&self, request: &SetLogVerbosityLevelRequest) -> Result<Message, MuxError> {
        debug!(
            client_id = self.inner.id,
            level = request.new_verbosity_level,
            "Client::set_log_verbosity_level: called"
        );
        self.send(Request::try_from(request)?).await
    }

    /// Subscribe to every update decoded for this client from now on
    pub fn listener(&self) -> Listener {
        self.inner.listeners.add(self.inner.listener_capacity)
    }

    /// Whether a `send` is currently waiting on `extra`
    pub fn is_waiting(&self, extra: &str) -> bool {
        self.inner.correlator.contains(extra)
    }

    pub fn stats(&self) -> ClientStats {
        let counters = &self.inner.counters;
        ClientStats {
            pending_requests: self.inner.correlator.pending(),
            active_listeners: self.inner.listeners.active_count(),
            stored_listeners: self.inner.listeners.len(),
            requests_sent: counters.requests_sent.load(Ordering::Relaxed),
            responses_received: counters.responses_received.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Tear down the transport binding
    ///
    /// Idempotent. Sends still waiting fail with [`MuxError::ChannelClosed`].
    /// Listener channels are left to their consumers and the registry entry
    /// is kept.
    pub async fn stop(&self) -> Result<(), MuxError> {
        let client_id = self.inner.id;
        let previous = self.inner.state.swap(ClientState::Stopped.as_u8(), Ordering::AcqRel);
        if ClientState::from_u8(previous) == ClientState::Stopped {
            debug!(client_id, "Client::stop: already stopped");
            return Ok(());
        }

        let catch_task = self
            .inner
            .catch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = catch_task {
            task.abort();
        }
        let abandoned = self.inner.correlator.clear();
        if abandoned > 0 {
            debug!(client_id, abandoned, "Client::stop: released waiting sends");
        }

        self.inner.transport.destroy(client_id).await?;
        info!(client_id, "Client stopped");
        Ok(())
    }

    async fn stop_after_failed_build(&self) {
        if let Err(e) = self.stop().await {
            warn!(client_id = self.inner.id, error = %e, "Failed to stop client after build failure");
        }
    }
}
