//! Error types for the WebSocket session layer

/// Result type alias using the session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session and signaling server operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connect attempt failed (network, TLS, DNS or handshake)
    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    /// Connection was closed by the peer or dropped without a clean close
    #[error("Connection closed abnormally: {0}")]
    AbnormalClose(String),

    /// Outgoing message dropped because no connection was open
    #[error("Send skipped: {0}")]
    SendSkipped(String),

    /// Teardown observed resources that were never initialized
    #[error("Shutdown race: {0}")]
    ShutdownRace(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// In-flight operation was cancelled by `stop`
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Signaling server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error, typically from a custom `Connector`
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should be routed to the reconnect supervisor
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailure(_)
                | Error::AbnormalClose(_)
                | Error::WebSocketError(_)
                | Error::OperationTimeout(_)
                | Error::IoError(_)
                | Error::Other(_)
        )
    }

    /// Check if this error was produced by teardown rather than the network
    pub fn is_shutdown_related(&self) -> bool {
        matches!(self, Error::Cancelled(_) | Error::ShutdownRace(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
