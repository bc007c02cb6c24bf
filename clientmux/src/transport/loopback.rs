//! In-memory transport
//!
//! Outbound requests are queued for inspection with [`LoopbackTransport::next_sent`];
//! inbound messages are whatever the owner injects. Used by the demo command
//! and by tests that need to control exactly what the receive loop sees.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::Transport;
use crate::error::MuxError;
use crate::message::{ClientId, EXTRA_FIELD, Message, Request};

pub struct LoopbackTransport {
    next_client_id: AtomicI32,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    outbound_tx: mpsc::UnboundedSender<(ClientId, Request)>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<(ClientId, Request)>>,
    fail_sends: AtomicBool,
    destroyed: DashSet<ClientId>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            next_client_id: AtomicI32::new(1),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            fail_sends: AtomicBool::new(false),
            destroyed: DashSet::new(),
        }
    }

    /// Queue an inbound message for the receive loop
    pub fn inject(&self, message: Message) {
        debug!(client_id = message.client_id, extra = ?message.extra, "LoopbackTransport::inject: called");
        // The receiver lives as long as self
        let _ = self.inbound_tx.send(message);
    }

    /// Inject a response to `request`, echoing its `@extra`
    pub fn reply(&self, client_id: ClientId, request: &Request, mut body: Value) -> Result<(), MuxError> {
        if let (Value::Object(object), Some(extra)) = (&mut body, &request.extra) {
            object.insert(EXTRA_FIELD.to_string(), Value::String(extra.clone()));
        }
        self.inject(Message::from_value(client_id, &body)?);
        Ok(())
    }

    /// Inject an unsolicited update
    pub fn push_update(&self, client_id: ClientId, body: &Value) -> Result<(), MuxError> {
        self.inject(Message::from_value(client_id, body)?);
        Ok(())
    }

    /// Wait for the next request handed to [`Transport::send`]
    pub async fn next_sent(&self) -> Option<(ClientId, Request)> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Take the next sent request if there is one
    pub fn try_next_sent(&self) -> Option<(ClientId, Request)> {
        self.outbound_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Make every subsequent send fail (or succeed again)
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Whether `destroy` was called for `client_id`
    pub fn destroyed(&self, client_id: ClientId) -> bool {
        self.destroyed.contains(&client_id)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn create_client(&self) -> Result<ClientId, MuxError> {
        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        debug!(client_id, "LoopbackTransport::create_client: created");
        Ok(client_id)
    }

    async fn send(&self, client_id: ClientId, request: &Request) -> Result<(), MuxError> {
        debug!(client_id, kind = %request.kind, extra = ?request.extra, "LoopbackTransport::send: called");
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MuxError::Transport("loopback send failure".to_string()));
        }
        if self.destroyed.contains(&client_id) {
            return Err(MuxError::Transport(format!("client {client_id} is destroyed")));
        }
        self.outbound_tx
            .send((client_id, request.clone()))
            .map_err(|_| MuxError::ChannelClosed("loopback outbound"))
    }

    async fn receive(&self, timeout: Duration) -> Result<Message, MuxError> {
        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(MuxError::ChannelClosed("loopback inbound")),
            Err(_) => Err(MuxError::ReceiveTimeout(timeout)),
        }
    }

    async fn destroy(&self, client_id: ClientId) -> Result<(), MuxError> {
        debug!(client_id, "LoopbackTransport::destroy: called");
        self.destroyed.insert(client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_client_ids_are_sequential() {
        let transport = LoopbackTransport::new();
        assert_eq!(transport.create_client().unwrap(), 1);
        assert_eq!(transport.create_client().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_send_is_observable() {
        let transport = LoopbackTransport::new();
        transport.send(1, &Request::new("getMe")).await.unwrap();

        let (client_id, request) = transport.next_sent().await.unwrap();
        assert_eq!(client_id, 1);
        assert_eq!(request.kind, "getMe");
        assert!(transport.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let transport = LoopbackTransport::new();
        let err = transport.receive(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, MuxError::ReceiveTimeout(_)));
    }

    #[tokio::test]
    async fn test_reply_echoes_extra() {
        let transport = LoopbackTransport::new();
        let mut request = Request::new("getMe");
        request.extra = Some("req-9".to_string());

        transport.reply(3, &request, json!({"@type": "user"})).unwrap();

        let message = transport.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(message.client_id, 3);
        assert_eq!(message.token(), Some("req-9"));
    }

    #[tokio::test]
    async fn test_failed_and_destroyed_sends() {
        let transport = LoopbackTransport::new();
        transport.fail_sends(true);
        assert!(transport.send(1, &Request::new("getMe")).await.is_err());
        transport.fail_sends(false);

        transport.destroy(1).await.unwrap();
        assert!(transport.destroyed(1));
        assert!(transport.send(1, &Request::new("getMe")).await.is_err());
        assert!(transport.send(2, &Request::new("getMe")).await.is_ok());
    }
}
