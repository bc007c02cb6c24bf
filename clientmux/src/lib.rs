//! clientmux - request/response correlation and update fan-out
//!
//! Many logical clients share one transport connection. A single receive
//! loop pulls every inbound message, routes it by client id, and hands it to
//! two consumers inside the client:
//!
//! - **Correlator:** one-shot waiters keyed by the `@extra` token a `send`
//!   attached to its request
//! - **Listeners:** long-lived subscribers receiving every decoded update
//!
//! ```text
//!  caller ── send ──► Transport ──► ReceiveLoop ──► Registry lookup
//!                                        │
//!                        ┌───────────────┴───────────────┐
//!                        ▼                               ▼
//!                catcher queue ──► Correlator      decode ──► Listeners
//!                                      │                        │
//!                                      ▼                        ▼
//!                               waiting send              subscribers
//! ```
//!
//! # Modules
//!
//! - [`client`] - client construction, `send`, listeners, lifecycle
//! - [`correlator`] - token to waiter map and the per-client catch loop
//! - [`listener`] - listener registry, fan-out policy and GC
//! - [`registry`] - client id routing table
//! - [`receiver`] - the shared receive loop
//! - [`transport`] - transport seam and an in-memory implementation
//! - [`config`] - configuration types and loading

pub mod cli;
pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod extra;
pub mod listener;
pub mod message;
pub mod receiver;
pub mod registry;
pub mod transport;
pub mod update;

// Re-export commonly used types
pub use client::{Client, ClientBuilder, ClientState, ClientStats};
pub use config::{ClientConfig, Config};
pub use correlator::{Correlator, Waiter};
pub use error::MuxError;
pub use extra::{ExtraGenerator, ExtraStrategy, sequential_generator, uuid_generator};
pub use listener::{FanOutPolicy, FanOutReport, Listener, ListenerStore};
pub use message::{AddProxyRequest, ClientId, Message, ProxyType, Request, SetLogVerbosityLevelRequest};
pub use receiver::{ReceiveLoop, RouteOutcome};
pub use registry::{ClientRoute, Registry};
pub use transport::{LoopbackTransport, Transport};
pub use update::{Decoder, JsonDecoder, Update};
