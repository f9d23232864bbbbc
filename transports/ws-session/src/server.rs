//! WebSocket signaling server
//!
//! The server-side counterpart of `Session`: accepts WebSocket upgrades on a
//! single path and keeps one active peer. A newly accepted peer replaces the
//! previous one, which is closed.
//!
//! The server runs on a dedicated thread with its own tokio runtime, so it can
//! be started from synchronous code and from tests that are not async.

use crate::config::ServerConfig;
use crate::message::MessageKind;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Time the server thread waits for peer tasks to finish on shutdown
const PEER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Callbacks for server events, invoked on the server thread
pub trait ServerHandler: Send + Sync + 'static {
    fn on_peer_connected(&self, _peer_id: u64, _addr: SocketAddr) {}

    /// A data frame arrived from peer `peer_id`
    fn on_message(&self, peer_id: u64, kind: MessageKind, payload: &[u8]);

    fn on_peer_closed(&self, _peer_id: u64) {}
}

enum PeerCommand {
    Send(Message),
    Close,
}

struct ActivePeer {
    id: u64,
    tx: mpsc::UnboundedSender<PeerCommand>,
}

struct ServerState {
    path: String,
    ws_config: WebSocketConfig,
    handler: Arc<dyn ServerHandler>,
    active: Mutex<Option<ActivePeer>>,
    next_peer_id: AtomicU64,
}

/// WebSocket signaling server
pub struct SignalingServer {
    config: ServerConfig,
    handler: Arc<dyn ServerHandler>,
}

impl SignalingServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Self {
        Self { config, handler }
    }

    /// Create and start a server in one step
    pub fn bind(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Result<ServerHandle> {
        Self::new(config, handler).start()
    }

    /// Start the server
    ///
    /// Spawns the server thread and blocks until the listener is bound.
    /// Must not be called from within an async context.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` if the configuration does not validate
    /// - `Error::IoError` if the thread, runtime or listener cannot be created
    pub fn start(self) -> Result<ServerHandle> {
        self.config.validate()?;

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let state = Arc::new(ServerState {
            path: self.config.path.clone(),
            ws_config: WebSocketConfig {
                max_message_size: Some(self.config.max_incoming_payload_bytes),
                max_frame_size: Some(self.config.max_incoming_payload_bytes),
                ..Default::default()
            },
            handler: self.handler,
            active: Mutex::new(None),
            next_peer_id: AtomicU64::new(1),
        });

        let (startup_tx, startup_rx) = oneshot::channel::<std::io::Result<SocketAddr>>();
        // Subscribed before the thread starts so a shutdown sent right after
        // startup is never lost
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        info!(bind_addr = %bind_addr, "Starting signaling server thread");

        let thread_state = Arc::clone(&state);
        let thread_shutdown = shutdown_tx.clone();
        let thread_handle = thread::Builder::new()
            .name("ws-signaling-server".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = startup_tx.send(Err(e));
                        return;
                    }
                };

                rt.block_on(serve(
                    bind_addr,
                    thread_state,
                    thread_shutdown,
                    shutdown_rx,
                    startup_tx,
                ));
                info!("Signaling server thread exiting");
            })?;

        match startup_rx.blocking_recv() {
            Ok(Ok(local_addr)) => {
                info!(addr = %local_addr, path = %self.config.path, "Signaling server listening");
                Ok(ServerHandle {
                    local_addr,
                    state,
                    shutdown_tx,
                    thread: Some(thread_handle),
                })
            }
            Ok(Err(e)) => {
                error!(error = %e, "Signaling server failed to start");
                let _ = thread_handle.join();
                Err(Error::IoError(e))
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(Error::ServerError(
                    "server startup channel closed unexpectedly".to_string(),
                ))
            }
        }
    }
}

async fn serve(
    bind_addr: String,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    startup_tx: oneshot::Sender<std::io::Result<SocketAddr>>,
) {
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind_addr = %bind_addr, error = %e, "Failed to bind signaling server");
            let _ = startup_tx.send(Err(e));
            return;
        }
    };

    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let _ = startup_tx.send(Err(e));
            return;
        }
    };
    let _ = startup_tx.send(Ok(local_addr));

    let mut tasks = Vec::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!(peer_addr = %peer_addr, "Accepted TCP connection");
                        let state = Arc::clone(&state);
                        let peer_shutdown = shutdown_tx.subscribe();
                        tasks.retain(|task: &tokio::task::JoinHandle<()>| !task.is_finished());
                        tasks.push(tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, state, peer_shutdown).await {
                                warn!(peer_addr = %peer_addr, error = %e, "WebSocket connection failed");
                            }
                        }));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Signaling server received shutdown signal");
                break;
            }
        }
    }

    if tokio::time::timeout(PEER_SHUTDOWN_TIMEOUT, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!(timeout = ?PEER_SHUTDOWN_TIMEOUT, "Peer connections did not close in time");
    }

    info!("Signaling server accept loop exited");
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let path = state.path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some(format!(
                "no WebSocket endpoint at {}",
                request.uri().path()
            )));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = accept_hdr_async_with_config(stream, check_path, Some(state.ws_config))
        .await
        .map_err(|e| Error::WebSocketError(format!("handshake failed: {}", e)))?;

    let peer_id = state.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let previous = state.active.lock().replace(ActivePeer { id: peer_id, tx });
    if let Some(previous) = previous {
        info!(peer_id, previous_peer_id = previous.id, "New peer replaces previous, closing it");
        let _ = previous.tx.send(PeerCommand::Close);
    }

    info!(peer_id, addr = %addr, "Peer connected");
    state.handler.on_peer_connected(peer_id, addr);

    let (mut sink, mut incoming) = ws_stream.split();

    loop {
        tokio::select! {
            message = incoming.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        info!(peer_id, text = %text, "Text message received");
                        state.handler.on_message(peer_id, MessageKind::Text, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(payload))) => {
                        debug!(peer_id, bytes = payload.len(), "Binary message received");
                        state.handler.on_message(peer_id, MessageKind::Binary, &payload);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(peer_id, frame = ?frame, "Peer closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(peer_id, error = %e, "Peer connection error");
                        break;
                    }
                    None => break,
                }
            }
            command = rx.recv() => {
                match command {
                    Some(PeerCommand::Send(message)) => {
                        if let Err(e) = sink.send(message).await {
                            warn!(peer_id, error = %e, "Failed to send to peer");
                            break;
                        }
                    }
                    Some(PeerCommand::Close) | None => {
                        send_close(&mut sink, "disconnected by server").await;
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                send_close(&mut sink, "server shutting down").await;
                break;
            }
        }
    }

    {
        let mut active = state.active.lock();
        if active.as_ref().map(|peer| peer.id) == Some(peer_id) {
            *active = None;
        }
    }

    info!(peer_id, "Peer disconnected");
    state.handler.on_peer_closed(peer_id);

    Ok(())
}

async fn send_close<S>(sink: &mut S, reason: &'static str)
where
    S: futures::Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Cow::Borrowed(reason),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

/// Handle for controlling a running `SignalingServer`
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL a client on this host can connect to
    pub fn url(&self) -> String {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        format!("ws://{}{}", addr, self.state.path)
    }

    /// Send a text frame to the active peer
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into()))
    }

    /// Send a binary frame to the active peer
    pub fn send_binary(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(payload.into()))
    }

    fn send(&self, message: Message) -> Result<()> {
        let active = self.state.active.lock();
        let peer = active
            .as_ref()
            .ok_or_else(|| Error::ServerError("no peer connected".to_string()))?;
        peer.tx
            .send(PeerCommand::Send(message))
            .map_err(|_| Error::ServerError(format!("peer {} connection closed", peer.id)))
    }

    /// Close the active peer's connection. Returns `false` if no peer was
    /// connected.
    pub fn disconnect_peer(&self) -> bool {
        match self.state.active.lock().take() {
            Some(peer) => {
                info!(peer_id = peer.id, "Disconnecting peer");
                peer.tx.send(PeerCommand::Close).is_ok()
            }
            None => false,
        }
    }

    pub fn has_peer(&self) -> bool {
        self.state.active.lock().is_some()
    }

    /// Id of the active peer
    pub fn peer_id(&self) -> Option<u64> {
        self.state.active.lock().as_ref().map(|peer| peer.id)
    }

    /// Shut down the server and wait for its thread to exit
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(handle) = self.thread.take() {
            info!("Sending shutdown signal to signaling server");
            let _ = self.shutdown_tx.send(());
            if handle.join().is_err() {
                warn!("Signaling server thread panicked");
            }
            info!("Signaling server thread exited");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    impl ServerHandler for NullHandler {
        fn on_message(&self, _peer_id: u64, _kind: MessageKind, _payload: &[u8]) {}
    }

    #[test]
    fn test_bind_rejects_invalid_path() {
        let config = ServerConfig {
            path: "test".to_string(),
            ..ServerConfig::loopback("/test")
        };

        let result = SignalingServer::bind(config, Arc::new(NullHandler));

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_url_uses_loopback_for_unspecified_address() {
        let config = ServerConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 0,
            ..Default::default()
        };

        let server = SignalingServer::bind(config, Arc::new(NullHandler)).unwrap();

        assert!(server.local_addr().port() > 0);
        assert_eq!(
            server.url(),
            format!("ws://127.0.0.1:{}/test", server.local_addr().port())
        );
        assert!(!server.has_peer());
        server.shutdown();
    }

    #[test]
    fn test_shutdown_right_after_bind_returns() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            for _ in 0..200 {
                let server = SignalingServer::bind(ServerConfig::loopback("/test"), Arc::new(NullHandler))
                    .unwrap();
                server.shutdown();
            }
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(20)).is_ok(),
            "shutdown hung after bind"
        );
    }

    #[test]
    fn test_drop_right_after_bind_returns() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            for _ in 0..200 {
                drop(SignalingServer::bind(ServerConfig::loopback("/test"), Arc::new(NullHandler)).unwrap());
            }
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(20)).is_ok(),
            "drop hung after bind"
        );
    }

    #[test]
    fn test_port_in_use_fails_to_start() {
        let first = SignalingServer::bind(ServerConfig::loopback("/test"), Arc::new(NullHandler)).unwrap();
        let config = ServerConfig {
            port: first.local_addr().port(),
            ..ServerConfig::loopback("/test")
        };

        let result = SignalingServer::bind(config, Arc::new(NullHandler));

        assert!(matches!(result, Err(Error::IoError(_))));
    }
}
