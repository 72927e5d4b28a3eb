//! JSON-RPC envelope types and the MCP connection lifecycle machine.

pub mod constants;
pub mod jsonrpc;
pub mod lifecycle;

pub use jsonrpc::*;
pub use lifecycle::*;
