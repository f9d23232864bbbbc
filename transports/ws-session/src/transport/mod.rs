//! Transport boundary consumed by the session
//!
//! A `Connector` opens connections; a `Connection` is the owned handle the
//! session's owning loop reads from and writes to. The default implementation
//! is backed by `tokio-tungstenite`.

mod websocket;

pub use websocket::TungsteniteConnector;

use crate::config::ConnectionOptions;
use crate::message::MessageKind;
use crate::Result;
use async_trait::async_trait;
use std::fmt;

/// Close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Event read from an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Data frame from the peer
    Message { kind: MessageKind, payload: Vec<u8> },
    /// Reply to a keepalive ping
    Pong(Vec<u8>),
    /// Peer closed the connection
    Closed { code: Option<u16>, reason: String },
    /// Protocol or I/O error; the connection is unusable afterwards
    Error(String),
}

/// An open WebSocket connection
///
/// Implementations are driven from a single thread (the session's owning
/// loop). `next_event` must be cancel-safe: it is polled inside `select!`.
#[async_trait]
pub trait Connection: Send {
    fn state(&self) -> ConnectionState;

    async fn send_text(&mut self, text: &str) -> Result<()>;

    async fn send_binary(&mut self, payload: &[u8]) -> Result<()>;

    async fn ping(&mut self, payload: &[u8]) -> Result<()>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;

    /// Next event, `None` once the underlying stream has ended
    async fn next_event(&mut self) -> Option<ConnectionEvent>;
}

/// Opens connections to a remote endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, options: &ConnectionOptions) -> Result<Box<dyn Connection>>;
}
