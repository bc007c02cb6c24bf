//! Error types for client multiplexing

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while sending requests or routing messages
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Response catching timeout after {0:?}")]
    Timeout(Duration),

    #[error("Receive timed out after {0:?}")]
    ReceiveTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Correlation token already in flight: {extra}")]
    DuplicateExtra { extra: String },

    #[error("Client {client_id} is stopped")]
    Stopped { client_id: i32 },

    #[error("Client id {client_id} is already registered")]
    DuplicateClient { client_id: i32 },

    #[error("Client {client_id} uses a transport the receive loop does not poll")]
    ForeignTransport { client_id: i32 },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MuxError {
    /// Check if this is a response or receive timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, MuxError::Timeout(_) | MuxError::ReceiveTimeout(_))
    }

    /// Check if the failed operation may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            MuxError::Timeout(_) => true,
            MuxError::ReceiveTimeout(_) => true,
            MuxError::Transport(_) => true,
            MuxError::DuplicateExtra { .. } => true,
            MuxError::Decode(_) => false,
            MuxError::Stopped { .. } => false,
            MuxError::DuplicateClient { .. } => false,
            MuxError::ForeignTransport { .. } => false,
            MuxError::ChannelClosed(_) => false,
            MuxError::Json(_) => false,
        }
    }
}
