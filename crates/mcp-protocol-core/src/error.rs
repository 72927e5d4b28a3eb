//! # Error Taxonomy
//!
//! The canonical error type for the protocol engine, `McpError`, is hierarchical:
//! callers match on a small set of categories (auth, resource, protocol,
//! external/"rtm", internal) while each constructed error also carries enough
//! context to be projected into a JSON-RPC error object via [`to_jsonrpc_error`].
//!
//! ## Error codes
//!
//! Standard JSON-RPC codes (`-32700`..`-32603`) are used where they apply.
//! Everything specific to this engine is projected onto the implementation-
//! defined server range (`-32099`..`-32000`) per fixed wire codes:
//! `RequestSequence → -32001`, `ResourceNotFound → -32002`,
//! `ResourceInvalid → -32003`, every `Auth*` kind → `-32010`, every
//! `Rtm*`/external kind → `-32020` except `RtmPermission → -32021`,
//! `ProtocolInvalid → -32600` (the standard `INVALID_REQUEST` code, with the
//! original internal taxonomy code carried under `data.internalCode`), and
//! `ProtocolUnsupported → -32601`.
//!
//! Internally, errors still carry a category (`AUTH_BASE`/`RTM_BASE`/
//! `RESOURCE_BASE`/`PROTOCOL_BASE`, `1000`s/`2000`s/`3000`s/`4000`s
//! respectively) used only for local diagnostics and the `internalCode`
//! annotation above — these bands are never themselves sent as the wire
//! `code`.
//!
//! ## Client-visible context
//!
//! `McpError::context` may carry arbitrary diagnostic key/value pairs, but
//! [`to_jsonrpc_error`] only forwards the allow-listed keys (`uri`, `toolName`,
//! `method`, `service`, `state`) into the wire-visible `error.data` object.
//! Everything else is for local logging only — widening that allow-list is a
//! deliberate decision, not something to do by accident while adding a new
//! context key.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

pub mod error_codes {
    // Standard JSON-RPC codes.
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Wire-visible codes, in the implementation-defined server range.
    pub const PROTOCOL_REQUEST_SEQUENCE: i32 = -32001;
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
    pub const RESOURCE_INVALID: i32 = -32003;
    pub const AUTH: i32 = -32010;
    pub const RTM: i32 = -32020;
    pub const RTM_PERMISSION: i32 = -32021;
    pub const PROTOCOL_INVALID: i32 = INVALID_REQUEST;
    pub const PROTOCOL_UNSUPPORTED: i32 = -32601;

    /// Internal taxonomy bands. Never sent as a wire `code` directly; kept
    /// for local diagnostics and the `ProtocolInvalid` `internalCode`
    /// annotation in [`super::to_jsonrpc_error`].
    pub const AUTH_BASE: i32 = 1000;
    pub const RTM_BASE: i32 = 2000;
    pub const RESOURCE_BASE: i32 = 3000;
    pub const PROTOCOL_BASE: i32 = 4000;
}

/// Keys that are allowed to cross into a client-visible `error.data` object.
/// Widen this list deliberately — every other context key stays server-side.
const SAFE_CONTEXT_KEYS: &[&str] = &["uri", "toolName", "method", "service", "state"];

pub type ErrorContext = BTreeMap<&'static str, Value>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("authentication error: {0}")]
    Auth(AuthError),

    #[error("resource error: {0}")]
    Resource(ResourceError),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("external service error: {0}")]
    Rtm(RtmError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AuthError {
    kind: AuthErrorKind,
    context: ErrorContext,
}

#[derive(Debug, Error)]
enum AuthErrorKind {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ResourceError {
    kind: ResourceErrorKind,
    context: ErrorContext,
}

#[derive(Debug, Error)]
enum ResourceErrorKind {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource invalid: {0}")]
    Invalid(String),
    #[error("service not found: {0}")]
    ServiceNotFound(String),
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    context: ErrorContext,
}

#[derive(Debug, Error)]
enum ProtocolErrorKind {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("unsupported protocol: {0}")]
    Unsupported(String),
    #[error("request out of sequence: {0}")]
    RequestSequence(String),
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct RtmError {
    kind: RtmErrorKind,
    context: ErrorContext,
}

#[derive(Debug, Error)]
enum RtmErrorKind {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("service timed out: {0}")]
    Timeout(String),
    #[error("permission denied: {0}")]
    Permission(String),
}

impl McpError {
    pub fn auth_unauthenticated() -> Self {
        Self::Auth(AuthError {
            kind: AuthErrorKind::Unauthenticated,
            context: ErrorContext::new(),
        })
    }

    pub fn auth_forbidden() -> Self {
        Self::Auth(AuthError {
            kind: AuthErrorKind::Forbidden,
            context: ErrorContext::new(),
        })
    }

    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let mut context = ErrorContext::new();
        context.insert("uri", Value::String(uri.clone()));
        Self::Resource(ResourceError {
            kind: ResourceErrorKind::NotFound(uri),
            context,
        })
    }

    pub fn resource_invalid(msg: impl Into<String>) -> Self {
        Self::Resource(ResourceError {
            kind: ResourceErrorKind::Invalid(msg.into()),
            context: ErrorContext::new(),
        })
    }

    pub fn service_not_found(service: impl Into<String>) -> Self {
        let service = service.into();
        let mut context = ErrorContext::new();
        context.insert("service", Value::String(service.clone()));
        Self::Resource(ResourceError {
            kind: ResourceErrorKind::ServiceNotFound(service),
            context,
        })
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError {
            kind: ProtocolErrorKind::Parse(msg.into()),
            context: ErrorContext::new(),
        })
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError {
            kind: ProtocolErrorKind::InvalidRequest(msg.into()),
            context: ErrorContext::new(),
        })
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        let method = method.into();
        let mut context = ErrorContext::new();
        context.insert("method", Value::String(method.clone()));
        Self::Protocol(ProtocolError {
            kind: ProtocolErrorKind::MethodNotFound(method),
            context,
        })
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError {
            kind: ProtocolErrorKind::InvalidParams(msg.into()),
            context: ErrorContext::new(),
        })
    }

    pub fn protocol_unsupported(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError {
            kind: ProtocolErrorKind::Unsupported(msg.into()),
            context: ErrorContext::new(),
        })
    }

    /// A method was called while the connection's lifecycle state did not
    /// permit it. Carries `method` and `state` context per the router's
    /// sequencing rules.
    pub fn request_sequence(method: impl Into<String>, state: impl fmt::Display) -> Self {
        let method = method.into();
        let state = state.to_string();
        let mut context = ErrorContext::new();
        context.insert("method", Value::String(method.clone()));
        context.insert("state", Value::String(state.clone()));
        Self::Protocol(ProtocolError {
            kind: ProtocolErrorKind::RequestSequence(format!(
                "method '{method}' is not permitted in state '{state}'"
            )),
            context,
        })
    }

    pub fn service_unavailable(service: impl Into<String>) -> Self {
        let service = service.into();
        let mut context = ErrorContext::new();
        context.insert("service", Value::String(service.clone()));
        Self::Rtm(RtmError {
            kind: RtmErrorKind::Unavailable(service),
            context,
        })
    }

    pub fn service_timeout(service: impl Into<String>) -> Self {
        let service = service.into();
        let mut context = ErrorContext::new();
        context.insert("service", Value::String(service.clone()));
        Self::Rtm(RtmError {
            kind: RtmErrorKind::Timeout(service),
            context,
        })
    }

    /// The external/"RTM" service rejected the call for lack of permission,
    /// distinct from `service_unavailable`/`service_timeout` — wire code
    /// `RTM_PERMISSION`, not the shared `RTM` code.
    pub fn service_permission_denied(service: impl Into<String>) -> Self {
        let service = service.into();
        let mut context = ErrorContext::new();
        context.insert("service", Value::String(service.clone()));
        Self::Rtm(RtmError {
            kind: RtmErrorKind::Permission(service),
            context,
        })
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Auth(e) => Some(&e.context),
            Self::Resource(e) => Some(&e.context),
            Self::Protocol(e) => Some(&e.context),
            Self::Rtm(e) => Some(&e.context),
            Self::Internal(_) | Self::Other(_) => None,
        }
    }
}

/// A fully resolved JSON-RPC error projection: code, message, and a
/// client-safe `data` object built from the allow-listed context keys only.
pub struct JsonRpcErrorProjection {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// Project an `McpError` into the wire-visible `(code, message, data)` triple.
/// `data` is filtered through [`SAFE_CONTEXT_KEYS`]; the full error (including
/// unfiltered context and any `source`) should be logged separately by the
/// caller before this projection is sent to the client.
pub fn to_jsonrpc_error(err: &McpError) -> JsonRpcErrorProjection {
    use error_codes::*;

    let code = match err {
        McpError::Auth(_) => AUTH,
        McpError::Resource(e) => match e.kind {
            ResourceErrorKind::NotFound(_) => RESOURCE_NOT_FOUND,
            ResourceErrorKind::Invalid(_) => RESOURCE_INVALID,
            ResourceErrorKind::ServiceNotFound(_) => RESOURCE_NOT_FOUND,
        },
        McpError::Protocol(e) => match &e.kind {
            ProtocolErrorKind::Parse(_) => PARSE_ERROR,
            ProtocolErrorKind::InvalidRequest(_) => PROTOCOL_INVALID,
            ProtocolErrorKind::MethodNotFound(_) => METHOD_NOT_FOUND,
            ProtocolErrorKind::InvalidParams(_) => INVALID_PARAMS,
            ProtocolErrorKind::Unsupported(_) => PROTOCOL_UNSUPPORTED,
            ProtocolErrorKind::RequestSequence(_) => PROTOCOL_REQUEST_SEQUENCE,
        },
        McpError::Rtm(e) => match e.kind {
            RtmErrorKind::Unavailable(_) => RTM,
            RtmErrorKind::Timeout(_) => RTM,
            RtmErrorKind::Permission(_) => RTM_PERMISSION,
        },
        McpError::Internal(_) | McpError::Other(_) => INTERNAL_ERROR,
    };

    let data = err.context().and_then(|ctx| {
        let mut filtered: serde_json::Map<String, Value> = ctx
            .iter()
            .filter(|(k, _)| SAFE_CONTEXT_KEYS.contains(k))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        if let McpError::Protocol(e) = err {
            if let ProtocolErrorKind::InvalidRequest(_) = e.kind {
                filtered.insert(
                    "internalCode".to_string(),
                    Value::Number((PROTOCOL_BASE).into()),
                );
            }
        }

        if filtered.is_empty() {
            None
        } else {
            Some(Value::Object(filtered))
        }
    });

    JsonRpcErrorProjection {
        code,
        message: err.to_string(),
        data,
    }
}
