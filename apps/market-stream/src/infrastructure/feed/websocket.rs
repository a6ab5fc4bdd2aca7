//! WebSocket Transport Adapter
//!
//! Production implementation of the feed ports on top of
//! `tokio-tungstenite`. TLS endpoints (`wss://`) use rustls with the
//! webpki root store.
//!
//! Protocol-level pings from the server are answered here and surface to
//! the session as heartbeat traffic only.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FeedConnector, FeedLink, LinkMessage, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector that dials WebSocket endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedLink>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(endpoint, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsLink { stream }))
    }
}

/// One open WebSocket connection.
pub struct WsLink {
    stream: WsStream,
}

#[async_trait]
impl FeedLink for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(map_error)
    }

    async fn next_message(&mut self) -> Option<Result<LinkMessage, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(map_error(e))),
            };

            match message {
                Message::Text(text) => return Some(Ok(LinkMessage::Text(text.as_str().to_owned()))),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(LinkMessage::Text(text))),
                    Err(_) => {
                        tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                    }
                },
                Message::Ping(data) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(map_error(e)));
                    }
                    return Some(Ok(LinkMessage::Heartbeat));
                }
                Message::Pong(_) => return Some(Ok(LinkMessage::Heartbeat)),
                Message::Close(frame) => {
                    return Some(Ok(LinkMessage::Closed(frame.map(|f| u16::from(f.code)))));
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.stream
            .send(Message::Ping(Vec::<u8>::new().into()))
            .await
            .map_err(map_error)
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: String::from("client disconnect").into(),
        };

        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }
}

fn map_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Io(other.to_string()),
    }
}
