//! Wire-level units exchanged with the transport
//!
//! Only the routing fields are interpreted here: the client id, the
//! correlation token (`@extra`) and the request type (`@type`). Everything
//! else is carried as an opaque payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::MuxError;

/// Identifier assigned by the transport when a client binding is created
pub type ClientId = i32;

/// Field carrying the correlation token on requests and responses
pub const EXTRA_FIELD: &str = "@extra";

/// Field carrying the object type on requests and updates
pub const TYPE_FIELD: &str = "@type";

/// Inbound unit produced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing key: the client this message belongs to
    pub client_id: ClientId,
    /// Correlation token echoed from a request, if any
    pub extra: Option<String>,
    /// Opaque payload handed to the decoder
    pub data: Vec<u8>,
}

impl Message {
    /// Create a message from raw parts
    pub fn new(client_id: ClientId, extra: Option<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            client_id,
            extra,
            data: data.into(),
        }
    }

    /// Build a message from a JSON payload, lifting `@extra` into the token
    pub fn from_json(client_id: ClientId, data: Vec<u8>) -> Result<Self, MuxError> {
        let value: Value = serde_json::from_slice(&data)?;
        let extra = value.get(EXTRA_FIELD).and_then(Value::as_str).map(str::to_string);
        debug!(client_id, ?extra, "Message::from_json: called");
        Ok(Self { client_id, extra, data })
    }

    /// Build a message from an already parsed JSON object
    pub fn from_value(client_id: ClientId, value: &Value) -> Result<Self, MuxError> {
        let extra = value.get(EXTRA_FIELD).and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            client_id,
            extra,
            data: serde_json::to_vec(value)?,
        })
    }

    /// The correlation token, treating an empty string as no token
    pub fn token(&self) -> Option<&str> {
        self.extra.as_deref().filter(|extra| !extra.is_empty())
    }

    /// Parse the payload as JSON
    pub fn json(&self) -> Result<Value, MuxError> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Outbound request; `extra` is assigned by the client at send time
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub kind: String,
    pub extra: Option<String>,
    pub params: Map<String, Value>,
}

impl Request {
    /// Create a request of the given type with no parameters
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            extra: None,
            params: Map::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build a request from any serializable object with an `@type` field
    pub fn from_object<T: Serialize>(object: &T) -> Result<Self, MuxError> {
        let Value::Object(mut params) = serde_json::to_value(object)? else {
            return Err(MuxError::Decode("request must serialize to an object".to_string()));
        };
        let kind = match params.remove(TYPE_FIELD) {
            Some(Value::String(kind)) => kind,
            _ => return Err(MuxError::Decode(format!("request is missing {TYPE_FIELD}"))),
        };
        let extra = match params.remove(EXTRA_FIELD) {
            Some(Value::String(extra)) => Some(extra),
            _ => None,
        };
        Ok(Self { kind, extra, params })
    }

    /// Render the request envelope: `{"@type": .., "@extra": .., ..params}`
    pub fn to_json(&self) -> Value {
        let mut object = self.params.clone();
        object.insert(TYPE_FIELD.to_string(), Value::String(self.kind.clone()));
        if let Some(extra) = &self.extra {
            object.insert(EXTRA_FIELD.to_string(), Value::String(extra.clone()));
        }
        Value::Object(object)
    }

    /// Serialize the envelope to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, MuxError> {
        Ok(serde_json::to_vec(&self.to_json())?)
    }
}

/// Proxy flavours accepted by `addProxy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum ProxyType {
    #[serde(rename = "proxyTypeSocks5")]
    Socks5 { username: String, password: String },

    #[serde(rename = "proxyTypeHttp")]
    Http {
        username: String,
        password: String,
        http_only: bool,
    },

    #[serde(rename = "proxyTypeMtproto")]
    Mtproto { secret: String },
}

/// Pre-formed request registering a proxy with the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename = "addProxy")]
pub struct AddProxyRequest {
    pub server: String,
    pub port: i32,
    pub enable: bool,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
}

/// Pre-formed request changing the transport's internal log verbosity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename = "setLogVerbosityLevel")]
pub struct SetLogVerbosityLevelRequest {
    pub new_verbosity_level: i32,
}

impl TryFrom<&AddProxyRequest> for Request {
    type Error = MuxError;

    fn try_from(req: &AddProxyRequest) -> Result<Self, Self::Error> {
        Request::from_object(req)
    }
}

impl TryFrom<&SetLogVerbosityLevelRequest> for Request {
    type Error = MuxError;

    fn try_from(req: &SetLogVerbosityLevelRequest) -> Result<Self, Self::Error> {
        Request::from_object(req)
    }
}
