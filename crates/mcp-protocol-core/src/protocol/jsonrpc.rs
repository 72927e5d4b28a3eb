//! JSON-RPC 2.0 envelope types shared by every MCP message.

use crate::protocol::constants::{
    JSONRPC_VERSION, MAX_REQUEST_ID_LENGTH, MAX_REQUEST_ID_NUMBER, MIN_REQUEST_ID_NUMBER,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::McpError;

/// JSON-RPC 2.0 request ID: string or integer, never coerced between the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn number(n: i64) -> Self {
        Self::Number(n)
    }

    pub fn validate(&self) -> Result<(), McpError> {
        match self {
            RequestId::String(s) => {
                if s.is_empty() {
                    return Err(McpError::invalid_request("request id string cannot be empty"));
                }
                if s.len() > MAX_REQUEST_ID_LENGTH {
                    return Err(McpError::invalid_request(format!(
                        "request id string too long (max {MAX_REQUEST_ID_LENGTH} characters)"
                    )));
                }
            }
            RequestId::Number(n) => {
                if *n < MIN_REQUEST_ID_NUMBER || *n > MAX_REQUEST_ID_NUMBER {
                    return Err(McpError::invalid_request(format!(
                        "request id number out of range ({MIN_REQUEST_ID_NUMBER} to {MAX_REQUEST_ID_NUMBER})"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

/// A JSON-RPC request or notification (a notification is a request whose
/// `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub meta: HashMap<String, Value>,
}

impl JsonRpcRequest {
    pub fn new(method: String, params: Option<Value>, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method,
            params,
            id,
            meta: HashMap::new(),
        }
    }

    pub fn notification(method: String, params: Option<Value>) -> Self {
        Self::new(method, params, None)
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response. `result` and `error` are mutually exclusive by
/// construction: the only public constructors are [`JsonRpcResponse::success`]
/// and [`JsonRpcResponse::error`], so no public mutation path can set both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Always serialized, as `null` when absent — unlike request/notification
    /// `id`, which is simply omitted — because an error response's `id` is
    /// meaningful wire information (e.g. "parse error before an id could be
    /// read") rather than an unset optional field.
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub meta: HashMap<String, Value>,
}

impl JsonRpcResponse {
    pub fn success(result: Value, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: Some(result),
            error: None,
            id,
            meta: HashMap::new(),
        }
    }

    pub fn error(error: JsonRpcError, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: None,
            error: Some(error),
            id,
            meta: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Project a taxonomy error ([`crate::error::McpError`]) into a wire
    /// error object, forwarding only its allow-listed context as `data`.
    pub fn from_mcp_error(err: &McpError) -> Self {
        let projection = crate::error::to_jsonrpc_error(err);
        let mut out = Self::new(projection.code, projection.message);
        if let Some(data) = projection.data {
            out = out.with_data(data);
        }
        out
    }
}

/// A JSON-RPC message read off the wire: exactly one of a request, a
/// notification, or a response.
///
/// `Request` and `Notification` both wrap [`JsonRpcRequest`], so a plain
/// `#[serde(untagged)]` derive would always match whichever is listed first
/// regardless of `id` presence. Deserialization is implemented by hand below,
/// keyed on the `method` field (present on requests/notifications, absent on
/// responses) and then on `id` presence.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcRequest),
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let has_method = value.get("method").is_some();
        if has_method {
            let request = JsonRpcRequest::deserialize(value).map_err(serde::de::Error::custom)?;
            if request.is_notification() {
                Ok(JsonRpcMessage::Notification(request))
            } else {
                Ok(JsonRpcMessage::Request(request))
            }
        } else {
            let response = JsonRpcResponse::deserialize(value).map_err(serde::de::Error::custom)?;
            Ok(JsonRpcMessage::Response(response))
        }
    }
}

/// Which of the four archetypes `validate_jsonrpc_message` and the schema
/// validator's alias resolution need to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archetype {
    Request,
    Notification,
    SuccessResponse,
    ErrorResponse,
}

impl JsonRpcMessage {
    pub fn get_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(req) => req.id.as_ref(),
            JsonRpcMessage::Response(resp) => resp.id.as_ref(),
            JsonRpcMessage::Notification(_) => None,
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcMessage::Notification(_))
    }

    pub fn archetype(&self) -> Archetype {
        match self {
            JsonRpcMessage::Request(_) => Archetype::Request,
            JsonRpcMessage::Notification(_) => Archetype::Notification,
            JsonRpcMessage::Response(r) if r.error.is_some() => Archetype::ErrorResponse,
            JsonRpcMessage::Response(_) => Archetype::SuccessResponse,
        }
    }
}

pub fn validate_jsonrpc_message(message: &JsonRpcMessage) -> Result<(), McpError> {
    match message {
        JsonRpcMessage::Request(request) => {
            if request.jsonrpc != JSONRPC_VERSION {
                return Err(McpError::invalid_request(format!(
                    "expected JSON-RPC version {}, got {}",
                    JSONRPC_VERSION, request.jsonrpc
                )));
            }
            if request.method.is_empty() {
                return Err(McpError::invalid_request("method name cannot be empty"));
            }
            if let Some(ref id) = request.id {
                id.validate()?;
            }
        }
        JsonRpcMessage::Response(response) => {
            if response.jsonrpc != JSONRPC_VERSION {
                return Err(McpError::invalid_request(format!(
                    "expected JSON-RPC version {}, got {}",
                    JSONRPC_VERSION, response.jsonrpc
                )));
            }
            if response.result.is_some() && response.error.is_some() {
                return Err(McpError::invalid_request(
                    "response cannot have both result and error",
                ));
            }
            if response.result.is_none() && response.error.is_none() {
                return Err(McpError::invalid_request(
                    "response must have either result or error",
                ));
            }
            if let Some(ref id) = response.id {
                id.validate()?;
            }
        }
        JsonRpcMessage::Notification(notification) => {
            if notification.jsonrpc != JSONRPC_VERSION {
                return Err(McpError::invalid_request(format!(
                    "expected JSON-RPC version {}, got {}",
                    JSONRPC_VERSION, notification.jsonrpc
                )));
            }
            if notification.method.is_empty() {
                return Err(McpError::invalid_request("method name cannot be empty"));
            }
            if notification.id.is_some() {
                return Err(McpError::invalid_request("notification cannot have an id"));
            }
        }
    }
    Ok(())
}
