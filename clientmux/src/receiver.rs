//! The receive loop: one task per registry pulling from the transport
//!
//! Each inbound message is routed by client id. The raw message goes to the
//! client's catcher queue (for response correlation), then the decoded
//! update is fanned out to the client's listeners. Messages for one client
//! are handled strictly in arrival order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::listener::FanOutReport;
use crate::message::Message;
use crate::registry::Registry;
use crate::transport::Transport;

/// What happened to one routed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No client registered for the message's id; dropped
    UnknownClient,
    /// Reached the catcher queue but could not be decoded; fan-out skipped
    Undecodable,
    /// Reached the catcher queue and was fanned out
    Delivered(FanOutReport),
}

pub struct ReceiveLoop {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    updates_timeout: Duration,
    min_poll_interval: Duration,
}

impl ReceiveLoop {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        updates_timeout: Duration,
        min_poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            updates_timeout,
            min_poll_interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll the transport forever
    ///
    /// Timeouts and receive errors are retried immediately, except that a
    /// call returning faster than `min_poll_interval` is padded out to it.
    pub async fn run(self) {
        info!(updates_timeout = ?self.updates_timeout, "Receive loop started");
        loop {
            let started = Instant::now();
            match self.transport.receive(self.updates_timeout).await {
                Ok(message) => {
                    self.route(message).await;
                    continue;
                }
                Err(e) if e.is_timeout() => trace!("ReceiveLoop::run: receive timed out"),
                Err(e) => warn!(error = %e, "Receive failed"),
            }

            let elapsed = started.elapsed();
            if elapsed < self.min_poll_interval {
                tokio::time::sleep(self.min_poll_interval - elapsed).await;
            }
        }
    }

    /// Route one message to its client
    pub async fn route(&self, message: Message) -> RouteOutcome {
        let client_id = message.client_id;
        let Some(client) = self.registry.lookup(client_id).await else {
            trace!(client_id, "ReceiveLoop::route: unknown client, dropping");
            return RouteOutcome::UnknownClient;
        };

        let decoded = client.decoder.decode(&message.data);

        if client.catcher.send(message).await.is_err() {
            debug!(client_id, "ReceiveLoop::route: catcher queue closed");
        }

        let update = match decoded {
            Ok(update) => update,
            Err(e) => {
                debug!(client_id, error = %e, "ReceiveLoop::route: skipping fan-out");
                return RouteOutcome::Undecodable;
            }
        };

        let report = client.listeners.fan_out(&update, client.fan_out).await;
        if report.needs_gc() {
            client.listeners.gc();
        }
        trace!(client_id, kind = %update.kind, ?report, "ReceiveLoop::route: fanned out");
        RouteOutcome::Delivered(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;
    use crate::listener::{FanOutPolicy, ListenerStore};
    use crate::message::{ClientId, Request};
    use crate::registry::ClientRoute;
    use crate::transport::LoopbackTransport;
    use crate::update::JsonDecoder;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    async fn setup() -> (ReceiveLoop, Arc<ListenerStore>, mpsc::Receiver<Message>) {
        let registry = Arc::new(Registry::new());
        let listeners = Arc::new(ListenerStore::new());
        let (tx, rx) = mpsc::channel(16);
        let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::new());
        registry
            .register(
                Arc::new(ClientRoute::new(
                    1,
                    tx,
                    Arc::clone(&listeners),
                    Arc::new(JsonDecoder),
                    FanOutPolicy::Drop,
                )),
                &transport,
            )
            .await
            .unwrap();
        let receiver = ReceiveLoop::new(
            registry,
            transport,
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        (receiver, listeners, rx)
    }

    #[tokio::test]
    async fn test_route_to_catcher_and_listeners() {
        let (receiver, listeners, mut catcher) = setup().await;
        let mut listener = listeners.add(10);

        let message = Message::from_value(1, &json!({"@type": "updateOption", "@extra": "x"})).unwrap();
        let outcome = receiver.route(message.clone()).await;

        assert!(matches!(outcome, RouteOutcome::Delivered(report) if report.delivered == 1));
        assert_eq!(catcher.recv().await.unwrap(), message);
        assert_eq!(listener.recv().await.unwrap().kind, "updateOption");
    }

    #[tokio::test]
    async fn test_unknown_client_dropped() {
        let (receiver, listeners, mut catcher) = setup().await;
        let mut listener = listeners.add(10);

        let outcome = receiver.route(Message::new(99, None, br#"{"@type":"x"}"#.to_vec())).await;

        assert_eq!(outcome, RouteOutcome::UnknownClient);
        assert!(catcher.try_recv().is_err());
        assert!(listener.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_still_reaches_catcher() {
        let (receiver, listeners, mut catcher) = setup().await;
        let mut listener = listeners.add(10);

        let outcome = receiver.route(Message::new(1, Some("r1".to_string()), b"garbage".to_vec())).await;

        assert_eq!(outcome, RouteOutcome::Undecodable);
        assert_eq!(catcher.recv().await.unwrap().token(), Some("r1"));
        assert!(listener.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_inactive_listener_triggers_gc() {
        let (receiver, listeners, _catcher) = setup().await;
        let mut closed = listeners.add(10);
        let _open = listeners.add(10);
        closed.close();

        receiver.route(Message::new(1, None, br#"{"@type":"x"}"#.to_vec())).await;

        assert_eq!(listeners.len(), 1);
    }

    /// Transport that fails instantly and counts calls
    struct FailingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FailingTransport {
        fn create_client(&self) -> Result<ClientId, MuxError> {
            Ok(1)
        }

        async fn send(&self, _client_id: ClientId, _request: &Request) -> Result<(), MuxError> {
            Ok(())
        }

        async fn receive(&self, _timeout: Duration) -> Result<Message, MuxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MuxError::Transport("down".to_string()))
        }

        async fn destroy(&self, _client_id: ClientId) -> Result<(), MuxError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_instant_failures_do_not_spin() {
        let transport = Arc::new(FailingTransport {
            calls: AtomicUsize::new(0),
        });
        let receiver = ReceiveLoop::new(
            Arc::new(Registry::new()),
            transport.clone(),
            Duration::from_secs(1),
            Duration::from_millis(20),
        );

        let task = receiver.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        let calls = transport.calls.load(Ordering::SeqCst);
        assert!(calls >= 1);
        assert!(calls <= 10, "receive called {calls} times in 100ms");
    }
}
