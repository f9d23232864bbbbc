//! `tokio-tungstenite` backed connector

use super::{Connection, ConnectionEvent, ConnectionState, Connector};
use crate::config::ConnectionOptions;
use crate::message::MessageKind;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for ws:// and wss:// endpoints
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str, options: &ConnectionOptions) -> Result<Box<dyn Connection>> {
        let config = WebSocketConfig {
            max_message_size: Some(options.max_incoming_payload_bytes),
            max_frame_size: Some(options.max_incoming_payload_bytes),
            ..Default::default()
        };

        let (stream, response) = tokio::time::timeout(
            options.connect_timeout(),
            connect_async_with_config(url, Some(config), true),
        )
        .await
        .map_err(|_| {
            Error::OperationTimeout(format!(
                "connect to {} did not finish within {}ms",
                url, options.connect_timeout_ms
            ))
        })?
        .map_err(|e| Error::ConnectFailure(format!("{}: {}", url, e)))?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        Ok(Box::new(TungsteniteConnection {
            stream,
            state: ConnectionState::Open,
        }))
    }
}

struct TungsteniteConnection {
    stream: WsStream,
    state: ConnectionState,
}

impl TungsteniteConnection {
    async fn send_message(&mut self, message: Message) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::SendSkipped(format!("connection is {}", self.state)));
        }

        self.stream.send(message).await.map_err(|e| {
            self.state = ConnectionState::Closed;
            Error::WebSocketError(format!("Failed to send: {}", e))
        })
    }
}

#[async_trait]
impl Connection for TungsteniteConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_message(Message::Text(text.to_string())).await
    }

    async fn send_binary(&mut self, payload: &[u8]) -> Result<()> {
        self.send_message(Message::Binary(payload.to_vec())).await
    }

    async fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send_message(Message::Ping(payload.to_vec())).await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Ok(());
        }
        self.state = ConnectionState::Closing;

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        let result = self.stream.close(Some(frame)).await;
        self.state = ConnectionState::Closed;

        result.map_err(|e| Error::WebSocketError(format!("Failed to close: {}", e)))
    }

    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.state = ConnectionState::Closed;
                    return Some(ConnectionEvent::Error(e.to_string()));
                }
                None => {
                    self.state = ConnectionState::Closed;
                    return None;
                }
            };

            match message {
                Message::Text(text) => {
                    return Some(ConnectionEvent::Message {
                        kind: MessageKind::Text,
                        payload: text.into_bytes(),
                    })
                }
                Message::Binary(payload) => {
                    return Some(ConnectionEvent::Message {
                        kind: MessageKind::Binary,
                        payload,
                    })
                }
                Message::Pong(payload) => return Some(ConnectionEvent::Pong(payload)),
                Message::Close(frame) => {
                    // tungstenite queues the close reply itself
                    self.state = ConnectionState::Closed;
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(ConnectionEvent::Closed { code, reason });
                }
                // pings are answered by tungstenite on the next read
                Message::Ping(_) | Message::Frame(_) => continue,
            }
        }
    }
}
