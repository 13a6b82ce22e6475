//! In-process transport built from a pair of channels.
//!
//! [`ChannelTransport`] is the client half handed to the provisioning flow.
//! [`RelayPeer`] is the server half: a framing layer (see the WebSocket
//! connector) or a test drives it to push requests and observe replies.

use super::{Connector, InboundRequest, Keepalive, Transport, TransportError};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, trace};

const CHANNEL_CAPACITY: usize = 32;

/// Traffic from the client half to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Response { id: u64, status: u16, message: String },
    Keepalive { path: String },
}

/// Client half of a channel transport.
pub struct ChannelTransport {
    inbound: mpsc::Receiver<Result<InboundRequest, TransportError>>,
    outbound: Option<mpsc::Sender<Outbound>>,
    keepalive: Option<JoinHandle<()>>,
}

/// Server half of a channel transport.
pub struct RelayPeer {
    inbound: mpsc::Sender<Result<InboundRequest, TransportError>>,
    outbound: mpsc::Receiver<Outbound>,
    next_id: u64,
}

/// Create a connected transport/peer pair.
///
/// Keepalives start one interval after creation; a zero interval disables them.
pub fn channel_pair(keepalive: &Keepalive) -> (ChannelTransport, RelayPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let ticker = (!keepalive.interval.is_zero()).then(|| {
        let tx = outbound_tx.clone();
        let path = keepalive.path.clone();
        let period = keepalive.interval;
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                trace!(path = %path, "Sending keepalive");
                if tx.send(Outbound::Keepalive { path: path.clone() }).await.is_err() {
                    break;
                }
            }
        })
    });

    let transport = ChannelTransport {
        inbound: inbound_rx,
        outbound: Some(outbound_tx),
        keepalive: ticker,
    };
    let peer = RelayPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
        next_id: 1,
    };
    (transport, peer)
}

impl ChannelTransport {
    fn stop_keepalive(&mut self) {
        if let Some(ticker) = self.keepalive.take() {
            ticker.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn next_request(&mut self) -> Option<Result<InboundRequest, TransportError>> {
        if self.is_closed() {
            return None;
        }
        self.inbound.recv().await
    }

    async fn respond(&mut self, id: u64, status: u16, message: &str) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound
            .send(Outbound::Response {
                id,
                status,
                message: message.to_string(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!("Closing channel transport");
        }
        self.stop_keepalive();
        self.inbound.close();
    }
}

impl RelayPeer {
    /// Push a request to the client. Returns its id.
    pub async fn send_request(
        &mut self,
        verb: &str,
        path: &str,
        body: Vec<u8>,
    ) -> Result<u64, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = InboundRequest {
            id,
            verb: verb.to_string(),
            path: path.to_string(),
            body,
        };
        self.inbound
            .send(Ok(request))
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(id)
    }

    /// Forward a request framed elsewhere, keeping its id.
    pub async fn forward(&self, request: InboundRequest) -> Result<(), TransportError> {
        self.inbound
            .send(Ok(request))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Push a request with a JSON body.
    pub async fn send_json<T: Serialize>(
        &mut self,
        verb: &str,
        path: &str,
        body: &T,
    ) -> Result<u64, TransportError> {
        let body = serde_json::to_vec(body).map_err(|e| TransportError::Framing(e.to_string()))?;
        self.send_request(verb, path, body).await
    }

    /// Report a connection-level failure to the client.
    pub async fn fail(&self, error: TransportError) {
        let _ = self.inbound.send(Err(error)).await;
    }

    /// Next outbound message; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next response, skipping keepalives.
    pub async fn recv_response(&mut self) -> Option<(u64, u16, String)> {
        while let Some(message) = self.recv().await {
            if let Outbound::Response {
                id,
                status,
                message,
            } = message
            {
                return Some((id, status, message));
            }
        }
        None
    }
}

/// Connector that hands the server half of every connection to its owner.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<(String, RelayPeer)>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of `(url, peer)` for each connection.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, RelayPeer)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        url: &str,
        keepalive: &Keepalive,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let (transport, peer) = channel_pair(keepalive);
        self.peers
            .send((url.to_string(), peer))
            .map_err(|_| TransportError::Connect(format!("no relay listening for {}", url)))?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiet() -> Keepalive {
        Keepalive {
            interval: Duration::ZERO,
            ..Keepalive::default()
        }
    }

    #[tokio::test]
    async fn test_request_and_response() {
        let (mut transport, mut peer) = channel_pair(&quiet());

        let id = peer.send_request("PUT", "/v1/address", b"{}".to_vec()).await.unwrap();
        let request = transport.next_request().await.unwrap().unwrap();
        assert_eq!(request.id, id);
        assert_eq!(request.verb, "PUT");
        assert_eq!(request.path, "/v1/address");

        transport.respond(id, 200, "OK").await.unwrap();
        assert_eq!(peer.recv_response().await, Some((id, 200, "OK".to_string())));
    }

    #[tokio::test]
    async fn test_close_is_visible_to_peer() {
        let (mut transport, mut peer) = channel_pair(&Keepalive::default());

        transport.close().await;
        transport.close().await;

        assert!(transport.is_closed());
        assert!(peer.recv().await.is_none());
        assert!(transport.respond(1, 200, "OK").await.is_err());
        assert!(transport.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_keepalive_ticks() {
        let keepalive = Keepalive {
            path: "/v1/keepalive/provisioning".into(),
            interval: Duration::from_millis(10),
        };
        let (_transport, mut peer) = channel_pair(&keepalive);

        let message = tokio::time::timeout(Duration::from_secs(2), peer.recv())
            .await
            .unwrap();
        assert_eq!(
            message,
            Some(Outbound::Keepalive {
                path: "/v1/keepalive/provisioning".into()
            })
        );
    }

    #[tokio::test]
    async fn test_peer_failure_reaches_client() {
        let (mut transport, peer) = channel_pair(&quiet());

        peer.fail(TransportError::Framing("bad frame".into())).await;

        let next = transport.next_request().await.unwrap();
        assert!(matches!(next, Err(TransportError::Framing(_))));
    }

    #[tokio::test]
    async fn test_memory_connector_hands_out_peers() {
        let (connector, mut peers) = MemoryConnector::new();

        let mut transport = connector
            .connect("ws://relay/v1/websocket/provisioning/", &quiet())
            .await
            .unwrap();
        let (url, mut peer) = peers.recv().await.unwrap();
        assert_eq!(url, "ws://relay/v1/websocket/provisioning/");

        peer.send_request("PUT", "/v1/message", vec![]).await.unwrap();
        assert!(transport.next_request().await.unwrap().is_ok());
    }
}
