//! Decoded updates and the decoder seam

use serde_json::Value;
use tracing::debug;

use crate::error::MuxError;
use crate::message::TYPE_FIELD;

/// Typed unit fanned out to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Object type taken from `@type`
    pub kind: String,
    /// Full decoded payload
    pub data: Value,
}

impl Update {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Turns an opaque payload into an [`Update`]
pub trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Update, MuxError>;
}

/// Decoder for JSON objects tagged with `@type`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, data: &[u8]) -> Result<Update, MuxError> {
        let value: Value = serde_json::from_slice(data).map_err(|e| MuxError::Decode(e.to_string()))?;
        let kind = value
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| MuxError::Decode(format!("missing {TYPE_FIELD}")))?
            .to_string();
        debug!(%kind, "JsonDecoder::decode: decoded");
        Ok(Update { kind, data: value })
    }
}
