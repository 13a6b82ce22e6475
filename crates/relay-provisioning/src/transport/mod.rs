//! Persistent request/response transport used by device provisioning.
//!
//! The server relays requests from the primary device as `(verb, path, body)`
//! and expects each to be acknowledged. Framing and socket mechanics live
//! behind [`Connector`]; the provisioning flow only sees [`Transport`].

mod channel;
mod websocket;

pub use channel::{channel_pair, ChannelTransport, MemoryConnector, Outbound, RelayPeer};
pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Default keepalive path of the provisioning socket.
pub const PROVISIONING_KEEPALIVE_PATH: &str = "/v1/keepalive/provisioning";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed")]
    Closed,

    #[error("protocol framing error: {0}")]
    Framing(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Periodic keepalive sent while a transport is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    pub path: String,
    pub interval: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            path: PROVISIONING_KEEPALIVE_PATH.to_string(),
            interval: Duration::from_secs(30),
        }
    }
}

/// A request pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub id: u64,
    pub verb: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// An open connection owned by a single consumer.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound request; `None` once the connection is gone.
    async fn next_request(&mut self) -> Option<Result<InboundRequest, TransportError>>;

    /// Acknowledge request `id`.
    async fn respond(&mut self, id: u64, status: u16, message: &str) -> Result<(), TransportError>;

    /// Close the connection. Closing an already closed transport is a no-op.
    async fn close(&mut self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        keepalive: &Keepalive,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
