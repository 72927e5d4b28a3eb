//! # mcp-protocol-engine
//!
//! Method routing, the per-connection message pipeline, and the abstract
//! `Transport` boundary that ties an embedder's I/O to the protocol building
//! blocks in `mcp-protocol-core`.
//!
//! This crate owns no business logic and ships no concrete transport: an
//! embedder registers [`router::Route`]s for the methods it supports, picks
//! (or implements) a [`transport::Transport`], and drives a
//! [`pipeline::Connection`] with [`pipeline::run`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │    │   Pipeline      │    │   Router        │
//! │   (embedder's)  │◄──►│   (Connection)  │◄──►│   (registered   │
//! │                 │    │                 │    │    routes)      │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │
//!                                 ▼
//!                         mcp-protocol-core
//!                  (lifecycle FSM, schema validation,
//!                       JSON-RPC envelope types)
//! ```
//!
//! ## Modules
//!
//! - **[`router`]**: a registered method table (`Router`/`RouterBuilder`)
//!   replacing a hardcoded method `match`
//! - **[`pipeline`]**: `Connection` and the decode → validate → gate → route
//!   → encode loop run once per connection
//! - **[`transport`]**: the `Transport` trait an embedder implements, plus an
//!   in-memory `DuplexTransport` test double
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mcp_protocol_engine::pipeline::{Connection, PipelineConfig};
//! use mcp_protocol_engine::router::{Route, RouterBuilder};
//! use mcp_protocol_engine::transport::duplex_pair;
//! use mcp_protocol_core::{SchemaValidator, SchemaValidatorConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let router = RouterBuilder::new()
//!     .add_route(Route::for_request(
//!         "tools/list",
//!         Arc::new(|_params| Box::pin(async { Ok(serde_json::json!({ "tools": [] })) })),
//!     ))?
//!     .build();
//!
//! let validator = Arc::new(SchemaValidator::new(SchemaValidatorConfig::default()));
//! validator.initialize().await?;
//!
//! let connection = Connection::new(Arc::new(router), validator, PipelineConfig::default());
//! let (_client, server_transport) = duplex_pair();
//! mcp_protocol_engine::pipeline::run(connection, server_transport).await;
//! # Ok(())
//! # }
//! ```

pub mod pipeline;
pub mod router;
pub mod transport;

pub use pipeline::{Connection, NegotiatedSession, PipelineConfig};
pub use router::{Route, Router, RouterBuilder};
pub use transport::{duplex_pair, DuplexTransport, Transport, TransportError};

pub use mcp_protocol_core::{McpError, McpResult};
