//! The abstract transport boundary.
//!
//! This crate never ships a concrete transport (no stdio, no HTTP) — an
//! embedder implements [`Transport`] for whatever channel carries their
//! bytes. The shape is kept close to the teacher's own `Transport` trait:
//! async `send`/`receive`/`close`, one in-flight call at a time per
//! direction. [`DuplexTransport`] is a paired in-memory implementation used
//! only by this crate's own integration tests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use mcp_protocol_core::JsonRpcMessage;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connection closed")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// A bidirectional, message-oriented channel carrying [`JsonRpcMessage`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&mut self, message: JsonRpcMessage) -> TransportResult<()>;

    /// Receive the next message, or [`TransportError::Closed`] once the peer
    /// has hung up and no further messages will arrive.
    async fn receive_message(&mut self) -> TransportResult<JsonRpcMessage>;

    async fn close(&mut self) -> TransportResult<()>;
}

/// One half of an in-memory duplex pair, built with [`duplex_pair`]. Used by
/// this crate's integration tests to drive a [`Connection`](crate::pipeline::Connection)
/// without a real transport.
pub struct DuplexTransport {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    closed: bool,
}

/// Build two [`DuplexTransport`]s wired to each other: messages sent on one
/// end arrive as `receive_message` on the other.
pub fn duplex_pair() -> (DuplexTransport, DuplexTransport) {
    let (tx_a, rx_b) = mpsc::unbounded_channel();
    let (tx_b, rx_a) = mpsc::unbounded_channel();
    (
        DuplexTransport {
            tx: tx_a,
            rx: rx_a,
            closed: false,
        },
        DuplexTransport {
            tx: tx_b,
            rx: rx_b,
            closed: false,
        },
    )
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send_message(&mut self, message: JsonRpcMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }

    async fn receive_message(&mut self) -> TransportResult<JsonRpcMessage> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        self.rx.close();
        Ok(())
    }
}
