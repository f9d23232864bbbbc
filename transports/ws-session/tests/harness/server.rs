//! Embedded signaling server on a random loopback port

use super::{HarnessError, HarnessResult};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use ws_session::{MessageKind, ServerConfig, ServerHandle, ServerHandler, SignalingServer};

/// Handler that records peers and messages
#[derive(Default)]
pub struct RecordingHandler {
    connected: Mutex<Vec<u64>>,
    closed: Mutex<Vec<u64>>,
    messages: Mutex<Vec<(u64, MessageKind, Vec<u8>)>>,
}

impl RecordingHandler {
    pub fn connected(&self) -> Vec<u64> {
        self.connected.lock().clone()
    }

    pub fn closed(&self) -> Vec<u64> {
        self.closed.lock().clone()
    }

    pub fn messages(&self) -> Vec<(u64, MessageKind, Vec<u8>)> {
        self.messages.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(_, kind, _)| *kind == MessageKind::Text)
            .map(|(_, _, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

impl ServerHandler for RecordingHandler {
    fn on_peer_connected(&self, peer_id: u64, _addr: SocketAddr) {
        self.connected.lock().push(peer_id);
    }

    fn on_message(&self, peer_id: u64, kind: MessageKind, payload: &[u8]) {
        self.messages.lock().push((peer_id, kind, payload.to_vec()));
    }

    fn on_peer_closed(&self, peer_id: u64) {
        self.closed.lock().push(peer_id);
    }
}

/// Signaling server bound to 127.0.0.1 on a free port
pub struct TestServer {
    pub handle: ServerHandle,
    pub handler: Arc<RecordingHandler>,
}

impl TestServer {
    pub fn start(path: &str) -> HarnessResult<Self> {
        let handler = Arc::new(RecordingHandler::default());
        let handle = SignalingServer::bind(
            ServerConfig::loopback(path),
            Arc::clone(&handler) as Arc<dyn ServerHandler>,
        )
        .map_err(|e| HarnessError::ServerError(e.to_string()))?;

        Ok(Self { handle, handler })
    }

    pub fn url(&self) -> String {
        self.handle.url()
    }

    /// URL with the same host and port but a different path
    pub fn url_with_path(&self, path: &str) -> String {
        format!("ws://{}{}", self.handle.local_addr(), path)
    }

    pub fn shutdown(self) {
        self.handle.shutdown();
    }
}
