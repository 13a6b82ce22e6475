//! WebSocket connector.
//!
//! Each text frame carries one JSON request or response:
//!
//! ```json
//! {"type":"request","id":1,"verb":"PUT","path":"/v1/address","body":"<base64>"}
//! {"type":"response","id":1,"status":200,"message":"OK"}
//! ```

use super::channel::{channel_pair, Outbound, RelayPeer};
use super::{Connector, InboundRequest, Keepalive, Transport, TransportError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum WireFrame {
    Request {
        id: u64,
        verb: String,
        path: String,
        #[serde(default)]
        body: String,
    },
    Response {
        id: u64,
        status: u16,
        #[serde(default)]
        message: String,
    },
}

/// Connector for `ws://` and `wss://` provisioning endpoints.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        keepalive: &Keepalive,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url = %url, "Provisioning socket connected");

        Ok(Box::new(bridge(stream, keepalive)))
    }
}

/// Attach a channel transport to an established WebSocket.
pub(crate) fn bridge<S>(stream: WebSocketStream<S>, keepalive: &Keepalive) -> super::ChannelTransport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (transport, peer) = channel_pair(keepalive);
    tokio::spawn(pump(stream, peer));
    transport
}

async fn pump<S>(stream: WebSocketStream<S>, mut peer: RelayPeer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let mut next_request_id: u64 = 1;

    loop {
        tokio::select! {
            frame = source.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(e) => {
                            peer.fail(TransportError::Framing(e.to_string())).await;
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Provisioning socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Provisioning socket error: {}", e);
                        peer.fail(TransportError::Framing(e.to_string())).await;
                        break;
                    }
                };

                match serde_json::from_str::<WireFrame>(&text) {
                    Ok(WireFrame::Request { id, verb, path, body }) => {
                        let body = match STANDARD.decode(body) {
                            Ok(body) => body,
                            Err(e) => {
                                peer.fail(TransportError::Framing(e.to_string())).await;
                                break;
                            }
                        };
                        let request = InboundRequest { id, verb, path, body };
                        if peer.forward(request).await.is_err() {
                            break;
                        }
                    }
                    Ok(WireFrame::Response { id, status, .. }) => {
                        trace!(id, status, "Server acknowledged request");
                    }
                    Err(e) => {
                        peer.fail(TransportError::Framing(e.to_string())).await;
                        break;
                    }
                }
            }
            outbound = peer.recv() => {
                let frame = match outbound {
                    Some(Outbound::Response { id, status, message }) => {
                        WireFrame::Response { id, status, message }
                    }
                    Some(Outbound::Keepalive { path }) => {
                        let id = next_request_id;
                        next_request_id += 1;
                        WireFrame::Request {
                            id,
                            verb: "GET".to_string(),
                            path,
                            body: String::new(),
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };

                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        peer.fail(TransportError::Framing(e.to_string())).await;
                        break;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    peer.fail(TransportError::Send(e.to_string())).await;
                    break;
                }
            }
        }
    }

    debug!("Provisioning socket pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::accept_async;

    async fn server_pair(keepalive: Keepalive) -> (Box<dyn Transport>, WebSocketStream<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            accept_async(tcp).await.unwrap()
        });

        let transport = WebSocketConnector::new()
            .connect(&format!("ws://{}/v1/websocket/provisioning/", addr), &keepalive)
            .await
            .unwrap();
        (transport, accept.await.unwrap())
    }

    fn quiet() -> Keepalive {
        Keepalive {
            interval: Duration::ZERO,
            ..Keepalive::default()
        }
    }

    async fn next_frame(server: &mut WebSocketStream<TcpStream>) -> Option<WireFrame> {
        loop {
            match server.next().await? {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_request_response_over_socket() {
        let (mut transport, mut server) = server_pair(quiet()).await;

        let frame = WireFrame::Request {
            id: 7,
            verb: "PUT".into(),
            path: "/v1/address".into(),
            body: STANDARD.encode(br#"{"uuid":"abc"}"#),
        };
        server
            .send(Message::Text(serde_json::to_string(&frame).unwrap()))
            .await
            .unwrap();

        let request = transport.next_request().await.unwrap().unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(request.path, "/v1/address");
        assert_eq!(request.body, br#"{"uuid":"abc"}"#);

        transport.respond(7, 200, "OK").await.unwrap();
        assert_eq!(
            next_frame(&mut server).await,
            Some(WireFrame::Response {
                id: 7,
                status: 200,
                message: "OK".into()
            })
        );

        transport.close().await;
        assert_eq!(next_frame(&mut server).await, None);
    }

    #[tokio::test]
    async fn test_keepalive_frames() {
        let keepalive = Keepalive {
            path: "/v1/keepalive/provisioning".into(),
            interval: Duration::from_millis(10),
        };
        let (_transport, mut server) = server_pair(keepalive).await;

        let frame = tokio::time::timeout(Duration::from_secs(2), next_frame(&mut server))
            .await
            .unwrap();
        assert!(matches!(
            frame,
            Some(WireFrame::Request { ref verb, ref path, .. })
                if verb == "GET" && path == "/v1/keepalive/provisioning"
        ));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_a_transport_error() {
        let (mut transport, mut server) = server_pair(quiet()).await;

        server.send(Message::Text("not json".into())).await.unwrap();

        let next = transport.next_request().await.unwrap();
        assert!(matches!(next, Err(TransportError::Framing(_))));
    }
}
