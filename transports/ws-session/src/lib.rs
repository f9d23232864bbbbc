//! WebSocket client sessions with bounded automatic reconnect
//!
//! This crate maintains a single logical WebSocket connection to a remote
//! endpoint, recovers from drops up to a bounded number of attempts, and
//! delivers inbound frames to a registered listener.
//!
//! # Features
//!
//! - **Owning I/O loop**: every protocol call on a connection happens on one
//!   dedicated thread
//! - **Latest-wins sends**: `send_async` never blocks; an unsent message is
//!   replaced by the next one
//! - **Reconnect supervisor**: fixed or exponential delay, bounded attempts,
//!   interrupted immediately by `stop`
//! - **Clean teardown**: `stop` cancels an in-flight connect, closes the open
//!   connection and joins every thread
//! - **Signaling server**: single-peer WebSocket endpoint for demos and tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  caller threads: start / send_async / stop               │
//! │    │                    │                                │
//! │    │               SendSlot (latest wins)                │
//! │    │                    ↓                                │
//! │    │              <name>-send ── Flush ──┐               │
//! │    ↓                                      ↓               │
//! │  work channel ─────────────────→ <name>-recv (owning loop)│
//! │    ↑                              ├─ Connector/Connection │
//! │  <name>-reconnect (supervisor) ←──┘  SessionListener      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ws_session::{ReconnectPolicy, SessionConfig};
//!
//! let config = SessionConfig::new("viewer")
//!     .with_reconnect(ReconnectPolicy::fixed(5, Duration::from_millis(500)));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.reconnect.max_attempts, 5);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for public API
pub use config::{ConnectionOptions, ServerConfig, SessionConfig};
pub use error::{Error, Result};
pub use lifecycle::ReconnectPolicy;
pub use listener::SessionListener;
pub use message::{ClientMessage, MessageKind, OutgoingMessage};
pub use server::{ServerHandle, ServerHandler, SignalingServer};
pub use session::{Session, SessionState};
pub use transport::{Connection, ConnectionEvent, ConnectionState, Connector, TungsteniteConnector};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
