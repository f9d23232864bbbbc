//! Scripted in-memory connector
//!
//! Each `connect` call consumes the next scripted `Step`; once the script is
//! exhausted the fallback step applies. Connections are `MockConnection`s
//! driven from the test through their `MockPeer`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use ws_session::{
    Connection, ConnectionEvent, ConnectionOptions, ConnectionState, Connector, Error,
    MessageKind, OutgoingMessage, Result,
};

pub enum Step {
    /// Fail with `ConnectFailure`
    Fail,
    /// Fail with the given error
    FailWith(Error),
    /// Hand out the given connection
    Succeed(MockConnection),
    /// Never complete; only cancellation ends the attempt
    Hang,
}

#[derive(Clone, Copy)]
enum Fallback {
    Fail,
    Hang,
}

pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    fallback: Fallback,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedConnector {
    /// Connector whose unscripted attempts fail
    pub fn failing() -> Arc<Self> {
        Arc::new(Self::with_fallback(Fallback::Fail))
    }

    /// Connector whose unscripted attempts never complete
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::with_fallback(Fallback::Hang))
    }

    fn with_fallback(fallback: Fallback) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    /// Number of `connect` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously outstanding `connect` calls
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Attempts dropped before they completed
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.steps.lock().pop_front().unwrap_or(match self.fallback {
            Fallback::Fail => Step::Fail,
            Fallback::Hang => Step::Hang,
        })
    }
}

/// Tracks one outstanding `connect` call
struct InFlightGuard<'a> {
    connector: &'a ScriptedConnector,
    completed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(connector: &'a ScriptedConnector) -> Self {
        let now = connector.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        connector.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            connector,
            completed: false,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.connector.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.completed {
            self.connector.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str, _options: &ConnectionOptions) -> Result<Box<dyn Connection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = InFlightGuard::new(self);

        let result: Result<Box<dyn Connection>> = match self.next_step() {
            Step::Fail => {
                tokio::task::yield_now().await;
                Err(Error::ConnectFailure(format!("{}: scripted failure", url)))
            }
            Step::FailWith(error) => {
                tokio::task::yield_now().await;
                Err(error)
            }
            Step::Succeed(connection) => Ok(Box::new(connection)),
            Step::Hang => std::future::pending().await,
        };

        guard.completed = true;
        result
    }
}

/// Shared between a `MockConnection` and its `MockPeer`
#[derive(Default)]
struct MockShared {
    sent: Mutex<Vec<OutgoingMessage>>,
    sends_started: AtomicUsize,
    pings: AtomicUsize,
    close_calls: AtomicUsize,
}

/// In-memory connection handed to the session
pub struct MockConnection {
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pongs: mpsc::UnboundedSender<ConnectionEvent>,
    shared: Arc<MockShared>,
    send_gate: Option<Arc<Semaphore>>,
    state: ConnectionState,
}

/// Test-side end of a `MockConnection`
#[derive(Clone)]
pub struct MockPeer {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shared: Arc<MockShared>,
    send_gate: Option<Arc<Semaphore>>,
}

/// Create a connection and its peer. With `gated`, every send blocks until
/// the test calls `MockPeer::release_sends`.
pub fn mock_connection(gated: bool) -> (MockConnection, MockPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(MockShared::default());
    let send_gate = gated.then(|| Arc::new(Semaphore::new(0)));

    let connection = MockConnection {
        events: rx,
        pongs: tx.clone(),
        shared: Arc::clone(&shared),
        send_gate: send_gate.clone(),
        state: ConnectionState::Open,
    };
    let peer = MockPeer {
        events: tx,
        shared,
        send_gate,
    };
    (connection, peer)
}

impl MockConnection {
    async fn record(&mut self, message: OutgoingMessage) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::SendSkipped(format!("connection is {}", self.state)));
        }

        self.shared.sends_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.send_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::WebSocketError("send gate closed".to_string()))?;
            permit.forget();
        }

        self.shared.sent.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.record(OutgoingMessage::Text(text.to_string())).await
    }

    async fn send_binary(&mut self, payload: &[u8]) -> Result<()> {
        self.record(OutgoingMessage::Binary(payload.to_vec())).await
    }

    async fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.shared.pings.fetch_add(1, Ordering::SeqCst);
        let _ = self.pongs.send(ConnectionEvent::Pong(payload.to_vec()));
        Ok(())
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<()> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Closed;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = self.events.recv().await;
        if matches!(event, Some(ConnectionEvent::Closed { .. }) | None) {
            self.state = ConnectionState::Closed;
        }
        event
    }
}

impl MockPeer {
    pub fn push_text(&self, text: &str) {
        let _ = self.events.send(ConnectionEvent::Message {
            kind: MessageKind::Text,
            payload: text.as_bytes().to_vec(),
        });
    }

    pub fn push_binary(&self, payload: &[u8]) {
        let _ = self.events.send(ConnectionEvent::Message {
            kind: MessageKind::Binary,
            payload: payload.to_vec(),
        });
    }

    /// Close the connection from the remote side
    pub fn close(&self, code: u16) {
        let _ = self.events.send(ConnectionEvent::Closed {
            code: Some(code),
            reason: "closed by peer".to_string(),
        });
    }

    pub fn fail(&self, message: &str) {
        let _ = self.events.send(ConnectionEvent::Error(message.to_string()));
    }

    /// Messages the session delivered, in order
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.shared.sent.lock().clone()
    }

    /// Sends that reached the connection, including ones still gated
    pub fn sends_started(&self) -> usize {
        self.shared.sends_started.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    pub fn release_sends(&self, count: usize) {
        if let Some(gate) = &self.send_gate {
            gate.add_permits(count);
        }
    }
}
