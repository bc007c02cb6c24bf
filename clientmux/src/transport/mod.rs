//! Transport adapter seam
//!
//! The transport owns marshalling and raw I/O. This crate only needs to
//! create and destroy client bindings, send requests, and pull the next
//! inbound message with a timeout.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::MuxError;
use crate::message::{ClientId, Message, Request};

mod loopback;

pub use loopback::LoopbackTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a new client binding and return its id
    fn create_client(&self) -> Result<ClientId, MuxError>;

    /// Transmit a request on behalf of `client_id`
    ///
    /// Fire-and-forget: success means the request was handed off, not that
    /// it was answered.
    async fn send(&self, client_id: ClientId, request: &Request) -> Result<(), MuxError>;

    /// Block for the next inbound message
    ///
    /// Returns [`MuxError::ReceiveTimeout`] when nothing arrives in time.
    async fn receive(&self, timeout: Duration) -> Result<Message, MuxError>;

    /// Tear down the binding for `client_id`
    async fn destroy(&self, client_id: ClientId) -> Result<(), MuxError>;
}
