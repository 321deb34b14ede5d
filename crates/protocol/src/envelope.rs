//! Message envelopes (JSON-RPC 2.0 framing).
//!
//! Every message on a channel is one of three shapes: a request carrying a
//! correlation id, the response echoing that id, or a notification with no
//! id at all. The message name travels in `method`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation token (string or number).
///
/// Generated by the requester, unique per channel while the request is in
/// flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    String(String),
    Number(i64),
}

impl From<i64> for CorrelationId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationId::String(s) => f.write_str(s),
            CorrelationId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A request expecting exactly one correlated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    pub id: CorrelationId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<CorrelationId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: non_null(params),
        }
    }
}

/// A one-way message. Never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl NotificationEnvelope {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: non_null(params),
        }
    }
}

/// The answer to a [`RequestEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub jsonrpc: String,
    pub id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl ResponseEnvelope {
    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: CorrelationId, error: RemoteError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns the result if successful, or the remote error.
    ///
    /// A missing `result` on a void response is read as `null`.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Structured error payload carried across the channel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const UNKNOWN_MESSAGE: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;
    pub const NO_HANDLER: i32 = -32000;
    pub const UNKNOWN_TOOL: i32 = -32001;
    pub const INVALID_ARGUMENTS: i32 = -32002;
    pub const DUPLICATE_CALL: i32 = -32003;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }

    pub fn unknown_message(name: &str) -> Self {
        Self::new(Self::UNKNOWN_MESSAGE, format!("unknown message: {name}"))
    }

    pub fn invalid_params(name: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            Self::INVALID_PARAMS,
            format!("invalid params for {name}: {reason}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code}] {message}")
    }
}

impl std::error::Error for RemoteError {}

/// Any frame that can appear on a channel.
#[derive(Debug, Clone)]
pub enum Envelope {
    Request(RequestEnvelope),
    Notification(NotificationEnvelope),
    Response(ResponseEnvelope),
}

impl Envelope {
    /// Classify a raw JSON frame.
    ///
    /// `method` + `id` is a request, `method` alone a notification, `id`
    /// without `method` a response.
    pub fn classify(frame: Value) -> Result<Self, RemoteError> {
        let has_method = frame.get("method").is_some();
        let has_id = frame.get("id").is_some_and(|id| !id.is_null());

        let envelope = match (has_method, has_id) {
            (true, true) => serde_json::from_value(frame).map(Envelope::Request),
            (true, false) => serde_json::from_value(frame).map(Envelope::Notification),
            (false, true) => serde_json::from_value(frame).map(Envelope::Response),
            (false, false) => {
                return Err(RemoteError::new(
                    RemoteError::INVALID_REQUEST,
                    "frame has neither method nor id",
                ));
            }
        };

        envelope.map_err(|e| RemoteError::new(RemoteError::INVALID_REQUEST, e.to_string()))
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }
}

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() { None } else { Some(value) }
}
