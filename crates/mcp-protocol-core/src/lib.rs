//! # mcp-protocol-core
//!
//! Transport-agnostic building blocks for a Model Context Protocol message
//! engine: the error taxonomy, a generic finite state machine, the concrete
//! MCP connection lifecycle built on it, JSON Schema validation, and the
//! JSON-RPC 2.0 envelope types every message is built from.
//!
//! This crate has no opinion about how bytes reach it — see
//! `mcp-protocol-engine` for the method router and message pipeline that
//! consume it against an abstract transport.

pub mod error;
pub mod fsm;
pub mod protocol;
pub mod schema;

pub use error::{to_jsonrpc_error, McpError, McpResult};
pub use fsm::{Fsm, FsmBuilder, FsmError, Transition};
pub use protocol::{
    Archetype, ClientCapabilities, ClientInfo, InitializeRequest, InitializeResponse,
    InitializedNotification, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    LifecycleEvent, LifecycleFsm, LifecycleState, RequestId, ServerCapabilities, ServerInfo,
    ShutdownRequest,
};
pub use schema::{SchemaSource, SchemaValidator, SchemaValidatorConfig, ValidationFailure};
