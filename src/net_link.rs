//! Duplex link to the remote conversational agent.
//!
//! The controller only sees the `Connector` / `OutboundHalf` / `InboundHalf`
//! traits; `WsConnector` is the WebSocket implementation used on the device.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mac_address::get_mac_address;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::error::TurnError;
use crate::protocol::{ClientMessage, ServerMessage, WireMessage};

/// Supplies the bearer credential for each new stream.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> anyhow::Result<String>;
}

/// A fixed token from the build-time configuration.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Opens one duplex stream per conversation turn.
#[async_trait]
pub trait Connector: Send + Sync {
    type Outbound: OutboundHalf;
    type Inbound: InboundHalf;

    async fn connect(&self, token: &str) -> Result<(Self::Outbound, Self::Inbound), TurnError>;
}

/// Send side of a stream.
#[async_trait]
pub trait OutboundHalf: Send {
    async fn send(&mut self, msg: ClientMessage) -> Result<(), TurnError>;

    /// Tell the agent no more audio follows. The receive side stays open.
    async fn close_send(&mut self) -> Result<(), TurnError> {
        self.send(ClientMessage::AudioEnd).await
    }

    /// Tear the connection down.
    async fn shutdown(&mut self) -> Result<(), TurnError>;
}

/// Receive side of a stream.
#[async_trait]
pub trait InboundHalf: Send {
    /// Next message from the agent, `Ok(None)` once the agent closed the stream.
    async fn recv(&mut self) -> Result<Option<ServerMessage>, TurnError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    ws_url: String,
    device_id: String,
    client_id: String,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>, device_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            device_id: device_id.into(),
            client_id: client_id.into(),
        }
    }

    fn build_request(&self, token: &str) -> anyhow::Result<tungstenite::http::Request<()>> {
        let url = Url::parse(&self.ws_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("no host in {}", self.ws_url))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let request = tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.ws_url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", tungstenite::handshake::client::generate_key())
            .header("Authorization", format!("Bearer {}", token))
            .header("Device-Id", &self.device_id)
            .header("Client-Id", &self.client_id)
            .header("Protocol-Version", "1")
            .body(())?;
        Ok(request)
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Outbound = WsOutbound;
    type Inbound = WsInbound;

    async fn connect(&self, token: &str) -> Result<(WsOutbound, WsInbound), TurnError> {
        let request = self.build_request(token).map_err(TurnError::transport)?;

        log::info!("Connecting to {}...", self.ws_url);
        log::debug!("Device-Id: {}, Client-Id: {}", self.device_id, self.client_id);
        let (ws_stream, _) = connect_async(request).await.map_err(TurnError::transport)?;
        log::info!("Connected!");

        let (sink, stream) = ws_stream.split();
        Ok((WsOutbound { sink }, WsInbound { stream }))
    }
}

pub struct WsOutbound {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl OutboundHalf for WsOutbound {
    async fn send(&mut self, msg: ClientMessage) -> Result<(), TurnError> {
        let ws_msg = match msg.encode()? {
            WireMessage::Text(text) => {
                log::debug!("Sending {}: {}", msg.kind(), text);
                Message::Text(text.into())
            }
            WireMessage::Binary(data) => Message::Binary(data),
        };
        self.sink.send(ws_msg).await.map_err(TurnError::transport)
    }

    async fn shutdown(&mut self) -> Result<(), TurnError> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TurnError::transport(e)),
        }
    }
}

pub struct WsInbound {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl InboundHalf for WsInbound {
    async fn recv(&mut self) -> Result<Option<ServerMessage>, TurnError> {
        loop {
            let msg = match self.stream.next().await {
                None | Some(Err(tungstenite::Error::ConnectionClosed)) => return Ok(None),
                Some(Err(e)) => return Err(TurnError::transport(e)),
                Some(Ok(msg)) => msg,
            };

            match msg {
                Message::Text(text) => match ServerMessage::from_json(text.as_str()) {
                    Ok(parsed) => return Ok(Some(parsed)),
                    Err(e) => log::warn!("Skipping malformed message ({}): {}", e, text.as_str()),
                },
                Message::Binary(data) => return Ok(Some(ServerMessage::audio(data.to_vec()))),
                Message::Close(frame) => {
                    log::info!("Server closed connection: {:?}", frame);
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

/// Device id to present to the agent. "unknown-device" falls back to the
/// lowercase MAC address, then to a random uuid.
pub fn resolve_device_id(configured: &str) -> String {
    if configured != "unknown-device" {
        return configured.to_string();
    }
    match get_mac_address() {
        Ok(Some(mac)) => mac.to_string().to_lowercase(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Client id persisted in `path` so the identity survives restarts.
pub fn resolve_client_id(configured: &str, path: &str) -> String {
    if configured != "unknown-client" {
        return configured.to_string();
    }

    if let Ok(content) = std::fs::read_to_string(path) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            log::info!("Loaded Client ID from file: {}", trimmed);
            return trimmed.to_string();
        }
    }

    let client_id = Uuid::new_v4().to_string();
    log::info!("Generated new Client ID: {}", client_id);
    if let Err(e) = std::fs::write(path, &client_id) {
        log::error!("Failed to save Client ID to file: {}", e);
    }
    client_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_identity_headers() {
        let connector = WsConnector::new("wss://agent.example.net:8443/v1/converse", "aa:bb", "client-1");
        let request = connector.build_request("tok").unwrap();
        let headers = request.headers();
        assert_eq!(headers["Authorization"], "Bearer tok");
        assert_eq!(headers["Device-Id"], "aa:bb");
        assert_eq!(headers["Client-Id"], "client-1");
        assert_eq!(headers["Protocol-Version"], "1");
        assert_eq!(headers["Host"], "agent.example.net:8443");
    }

    #[test]
    fn rejects_url_without_host() {
        let connector = WsConnector::new("not a url", "d", "c");
        assert!(connector.build_request("tok").is_err());
    }

    #[test]
    fn configured_ids_win() {
        assert_eq!(resolve_device_id("dev-7"), "dev-7");
        assert_eq!(resolve_client_id("client-7", "/nonexistent/never-read"), "client-7");
    }

    #[test]
    fn client_id_is_persisted() {
        let path = std::env::temp_dir().join(format!("walle_client_{}.txt", Uuid::new_v4()));
        let path = path.to_str().unwrap().to_string();

        let first = resolve_client_id("unknown-client", &path);
        let second = resolve_client_id("unknown-client", &path);
        assert_eq!(first, second);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn static_token() {
        assert_eq!(StaticToken("abc".into()).token().await.unwrap(), "abc");
    }
}
